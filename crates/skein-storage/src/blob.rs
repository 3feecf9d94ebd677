use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use futures::future::BoxFuture;

use skein_core::error::{Result, SkeinError};
use skein_core::traits::DataStore;
use skein_core::types::DataReference;

/// Blob store kept in process memory.
#[derive(Default)]
pub struct InMemoryDataStore {
    blobs: RwLock<HashMap<DataReference, Vec<u8>>>,
    writes: AtomicU64,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of writes performed, including overwrites.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// All stored references, sorted.
    pub fn keys(&self) -> Vec<DataReference> {
        let mut keys: Vec<_> = self
            .blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl DataStore for InMemoryDataStore {
    fn read_raw(&self, reference: &DataReference) -> BoxFuture<'_, Result<Vec<u8>>> {
        let found = self
            .blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned()
            .ok_or_else(|| SkeinError::DataNotFound(reference.to_string()));
        Box::pin(async move { found })
    }

    fn write_raw(&self, reference: &DataReference, bytes: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        if reference.is_empty() {
            let err = SkeinError::Storage("cannot write to an empty reference".to_string());
            return Box::pin(async move { Err(err) });
        }
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.clone(), bytes);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Box::pin(async { Ok(()) })
    }

    fn exists(&self, reference: &DataReference) -> BoxFuture<'_, Result<bool>> {
        let exists = self
            .blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(reference);
        Box::pin(async move { Ok(exists) })
    }
}
