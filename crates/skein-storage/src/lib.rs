pub mod blob;
pub mod catalog;
pub mod io;
pub mod status;

pub use blob::InMemoryDataStore;
pub use catalog::InMemoryCatalog;
pub use io::{
    InMemoryOutputReader, RemoteFileInputReader, RemoteFileOutputReader, RemoteFileOutputWriter,
};
pub use status::{InMemoryStatusStore, ScopedStatusStore};
