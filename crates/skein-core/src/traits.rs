use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, Result};
use crate::node::TaskTemplate;
use crate::status::{CatalogCacheStatus, NodeStatus};
use crate::types::*;

/// Status arena — one mutable record per node id, handed out as snapshots.
pub trait NodeStatusStore: Send + Sync + 'static {
    /// Current status, or `None` if the node has never been touched.
    fn node_status(&self, node_id: &str) -> Option<NodeStatus>;

    /// Replace the status of a node.
    fn set_node_status(&self, node_id: &str, status: NodeStatus);

    /// Copy of every status in the arena.
    fn snapshot(&self) -> BTreeMap<NodeId, NodeStatus>;
}

/// Blob store holding inputs, outputs and error documents.
pub trait DataStore: Send + Sync + 'static {
    fn read_raw(&self, reference: &DataReference) -> BoxFuture<'_, Result<Vec<u8>>>;

    fn write_raw(&self, reference: &DataReference, bytes: Vec<u8>) -> BoxFuture<'_, Result<()>>;

    fn exists(&self, reference: &DataReference) -> BoxFuture<'_, Result<bool>>;

    /// Copy a blob without decoding it.
    fn copy_raw(&self, from: &DataReference, to: &DataReference) -> BoxFuture<'_, Result<()>> {
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move {
            let bytes = self.read_raw(&from).await?;
            self.write_raw(&to, bytes).await
        })
    }

    fn read_literals(&self, reference: &DataReference) -> BoxFuture<'_, Result<LiteralMap>> {
        let reference = reference.clone();
        Box::pin(async move {
            let bytes = self.read_raw(&reference).await?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }

    fn write_literals(
        &self,
        reference: &DataReference,
        literals: &LiteralMap,
    ) -> BoxFuture<'_, Result<()>> {
        let reference = reference.clone();
        let encoded = serde_json::to_vec(literals);
        Box::pin(async move { self.write_raw(&reference, encoded?).await })
    }
}

/// Bound inputs of one node occurrence.
pub trait InputReader: Send + Sync + 'static {
    /// Where the inputs live.
    fn inputs_path(&self) -> DataReference;

    fn get(&self) -> BoxFuture<'_, Result<LiteralMap>>;
}

/// Outputs (or an error document) produced by an execution.
pub trait OutputReader: Send + Sync + 'static {
    /// The execution reported an error instead of outputs.
    fn is_error(&self) -> BoxFuture<'_, Result<bool>>;

    fn read_error(&self) -> BoxFuture<'_, Result<ExecutionError>>;

    fn exists(&self) -> BoxFuture<'_, Result<bool>>;

    /// Outputs already sit at the node's committed output location.
    fn is_file(&self) -> bool;

    fn read(&self) -> BoxFuture<'_, Result<LiteralMap>>;
}

/// Commits outputs to a node's output location.
pub trait OutputWriter: Send + Sync + 'static {
    fn outputs_path(&self) -> DataReference;

    fn put(&self, reader: Arc<dyn OutputReader>) -> BoxFuture<'_, Result<()>>;
}

/// Identifies a memoizable unit of work.
#[derive(Clone)]
pub struct CatalogKey {
    pub identifier: Identifier,
    pub cache_version: String,
    pub typed_interface: TypedInterface,
    pub input_reader: Arc<dyn InputReader>,
}

impl CatalogKey {
    pub fn for_task(template: &TaskTemplate, input_reader: Arc<dyn InputReader>) -> Self {
        Self {
            identifier: template.id.clone(),
            cache_version: template.metadata.discovery_version.clone(),
            typed_interface: template.interface.clone(),
            input_reader,
        }
    }
}

impl std::fmt::Debug for CatalogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogKey")
            .field("identifier", &self.identifier)
            .field("cache_version", &self.cache_version)
            .field("inputs", &self.input_reader.inputs_path())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub outputs: Option<LiteralMap>,
    pub status: CatalogCacheStatus,
}

impl CatalogEntry {
    pub fn hit(outputs: LiteralMap) -> Self {
        Self {
            outputs: Some(outputs),
            status: CatalogCacheStatus::Hit,
        }
    }

    pub fn disabled() -> Self {
        Self {
            outputs: None,
            status: CatalogCacheStatus::Disabled,
        }
    }
}

/// Provenance recorded alongside cached outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub execution_id: WorkflowExecutionIdentifier,
    pub node_id: NodeId,
    pub attempt: u32,
}

/// Memoization backend.
pub trait CatalogClient: Send + Sync + 'static {
    /// Look up cached outputs. A miss is `SkeinError::CatalogNotFound`.
    fn get(&self, key: &CatalogKey) -> BoxFuture<'_, Result<CatalogEntry>>;

    /// Store outputs under a key.
    fn put(
        &self,
        key: &CatalogKey,
        reader: Arc<dyn OutputReader>,
        metadata: CatalogMetadata,
    ) -> BoxFuture<'_, Result<CatalogCacheStatus>>;
}

/// Who asked for a remote launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchContext {
    pub principal: String,
    pub nesting_level: u32,
    pub parent_node_execution: NodeExecutionIdentifier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionPhase {
    #[default]
    Undefined,
    Queued,
    Running,
    Succeeding,
    Succeeded,
    Failing,
    Failed,
    Aborted,
    TimedOut,
}

/// Outputs of a finished remote execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutputs {
    /// Pointer to externally stored outputs.
    Uri(DataReference),
    /// Inlined values.
    Values(LiteralMap),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionClosure {
    pub phase: WorkflowExecutionPhase,
    #[serde(default)]
    pub outputs: Option<ExecutionOutputs>,
    #[serde(default)]
    pub error: Option<ExecutionError>,
}

/// Remote workflow-launch backend.
pub trait LaunchPlanExecutor: Send + Sync + 'static {
    /// Launch an execution. Idempotent: an existing id yields
    /// `SkeinError::ExecutionAlreadyExists`.
    fn launch(
        &self,
        ctx: LaunchContext,
        execution_id: WorkflowExecutionIdentifier,
        launch_plan: Identifier,
        inputs: LiteralMap,
    ) -> BoxFuture<'_, Result<()>>;

    /// Poll a launched execution. `None` means the backend has no closure yet.
    fn get_status(
        &self,
        execution_id: &WorkflowExecutionIdentifier,
    ) -> BoxFuture<'_, Result<Option<ExecutionClosure>>>;

    fn kill(
        &self,
        execution_id: &WorkflowExecutionIdentifier,
        reason: &str,
    ) -> BoxFuture<'_, Result<()>>;
}

/// Static capabilities of a task plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginProperties {
    /// The plugin manages its own caching; skip catalog writes.
    pub disable_node_level_caching: bool,
}

/// Everything a plugin sees for one invocation.
#[derive(Clone)]
pub struct TaskExecutionContext {
    pub node_id: NodeId,
    pub unique_id: String,
    pub attempt: u32,
    pub execution_id: WorkflowExecutionIdentifier,
    pub template: TaskTemplate,
    pub input_reader: Arc<dyn InputReader>,
    pub output_dir: DataReference,
    pub data_store: Arc<dyn DataStore>,
    /// State returned by the previous invocation.
    pub plugin_state: serde_json::Value,
    pub plugin_state_version: u32,
}

/// Result of one plugin invocation.
#[derive(Clone)]
pub enum PluginTransition {
    Queued {
        state: serde_json::Value,
    },
    Running {
        state: serde_json::Value,
    },
    Success {
        state: serde_json::Value,
        outputs: Option<Arc<dyn OutputReader>>,
    },
    RetryableFailure(ExecutionError),
    PermanentFailure(ExecutionError),
}

impl std::fmt::Debug for PluginTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginTransition::Queued { .. } => f.write_str("Queued"),
            PluginTransition::Running { .. } => f.write_str("Running"),
            PluginTransition::Success { outputs, .. } => f
                .debug_struct("Success")
                .field("has_outputs", &outputs.is_some())
                .finish(),
            PluginTransition::RetryableFailure(e) => {
                f.debug_tuple("RetryableFailure").field(e).finish()
            }
            PluginTransition::PermanentFailure(e) => {
                f.debug_tuple("PermanentFailure").field(e).finish()
            }
        }
    }
}

/// Executes one task type.
pub trait TaskPlugin: Send + Sync + 'static {
    /// Plugin name, also the task type it serves by default.
    fn id(&self) -> &str;

    fn properties(&self) -> PluginProperties {
        PluginProperties::default()
    }

    /// One-time initialization before the first pass.
    fn setup(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Advance the task by one step.
    fn handle(&self, ctx: TaskExecutionContext) -> BoxFuture<'_, Result<PluginTransition>>;

    /// Best-effort stop of a running task.
    fn abort(&self, ctx: TaskExecutionContext, reason: &str) -> BoxFuture<'_, Result<()>> {
        let _ = (ctx, reason);
        Box::pin(async { Ok(()) })
    }
}

/// Maps a task type to the plugin that executes it.
pub trait PluginResolver: Send + Sync + 'static {
    fn resolve_plugin(&self, task_type: &str) -> Result<Arc<dyn TaskPlugin>>;

    /// Every distinct plugin, used to run setup.
    fn plugins(&self) -> Vec<Arc<dyn TaskPlugin>>;
}
