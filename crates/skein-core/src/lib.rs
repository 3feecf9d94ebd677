pub mod config;
pub mod error;
pub mod event;
pub mod lineage;
pub mod node;
pub mod status;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{ExecutionError, Result, SkeinError};
pub use event::{EventBus, NodeEvent};
pub use lineage::{ExecutionContext, ParentInfo};
pub use node::{Node, NodeKind, NodeTarget, WorkflowSpec};
pub use status::{NodeStatus, Phase};
pub use types::*;
