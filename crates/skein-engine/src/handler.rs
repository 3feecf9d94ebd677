use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use skein_core::error::{ExecutionError, Result, SkeinError};
use skein_core::lineage::ExecutionContext;
use skein_core::node::{Node, NodeKind};
use skein_core::status::{BranchNodeState, NodeStatus, TaskNodeState, WorkflowNodeState};
use skein_core::traits::{DataStore, InputReader, OutputWriter};
use skein_core::types::{DataReference, NodeId};

use crate::dag::DagStructure;
use crate::lookup::NodeLookup;

/// Outcome of driving a node (and its reachable subtree) for one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Waiting on predecessors.
    Pending,
    Queued,
    Running,
    /// The node and everything reachable from it finished successfully.
    Complete,
    Failed(ExecutionError),
}

impl NodeOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, NodeOutcome::Complete)
    }
}

/// Entry points handlers use to recurse into nested graphs.
pub trait RecursiveNodeExecutor: Send + Sync {
    fn recursive_node_handler<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        dag: &'a dyn DagStructure,
        lookup: &'a dyn NodeLookup,
        node: Arc<Node>,
    ) -> BoxFuture<'a, Result<NodeOutcome>>;

    fn abort_handler<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        dag: &'a dyn DagStructure,
        lookup: &'a dyn NodeLookup,
        node: Arc<Node>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Data directory a node gets under `ctx`.
    fn node_data_dir(&self, ctx: &ExecutionContext, node_id: &str) -> Result<DataReference>;
}

/// Phase reported by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerPhase {
    Running,
    /// The handler could not tell whether work is progressing.
    Indeterminate,
    Success,
    Failed(ExecutionError),
    Skip,
}

/// What a handler asks the executor to record.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: HandlerPhase,
    pub message: String,
    pub branch: Option<BranchNodeState>,
    pub task: Option<TaskNodeState>,
    pub workflow: Option<WorkflowNodeState>,
    pub data_dir: Option<DataReference>,
    pub output_dir: Option<DataReference>,
    /// Nodes to record as skipped alongside this transition.
    pub skipped: Vec<NodeId>,
}

impl Transition {
    fn with_phase(phase: HandlerPhase) -> Self {
        Self {
            phase,
            message: String::new(),
            branch: None,
            task: None,
            workflow: None,
            data_dir: None,
            output_dir: None,
            skipped: vec![],
        }
    }

    pub fn running() -> Self {
        Self::with_phase(HandlerPhase::Running)
    }

    pub fn indeterminate(message: impl Into<String>) -> Self {
        Self::with_phase(HandlerPhase::Indeterminate).with_message(message)
    }

    pub fn success() -> Self {
        Self::with_phase(HandlerPhase::Success)
    }

    pub fn failure(err: ExecutionError) -> Self {
        Self::with_phase(HandlerPhase::Failed(err))
    }

    pub fn skip() -> Self {
        Self::with_phase(HandlerPhase::Skip)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_branch_state(mut self, state: BranchNodeState) -> Self {
        self.branch = Some(state);
        self
    }

    pub fn with_task_state(mut self, state: TaskNodeState) -> Self {
        self.task = Some(state);
        self
    }

    pub fn with_workflow_state(mut self, state: WorkflowNodeState) -> Self {
        self.workflow = Some(state);
        self
    }

    pub fn with_skipped(mut self, skipped: Vec<NodeId>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Point the node at directories owned by another node.
    pub fn with_dirs(mut self, data_dir: DataReference, output_dir: DataReference) -> Self {
        self.data_dir = Some(data_dir);
        self.output_dir = Some(output_dir);
        self
    }
}

/// Everything a handler sees for one invocation.
pub struct NodeExecutionContext<'a> {
    pub node: Arc<Node>,
    /// Snapshot of the node's status before this invocation.
    pub status: NodeStatus,
    /// Context the node runs in. Its parent info is the node's parent.
    pub exec_ctx: &'a ExecutionContext,
    pub unique_id: String,
    pub lookup: &'a dyn NodeLookup,
    pub executor: &'a dyn RecursiveNodeExecutor,
    pub input_reader: Arc<dyn InputReader>,
    pub output_writer: Arc<dyn OutputWriter>,
    pub data_store: Arc<dyn DataStore>,
}

impl NodeExecutionContext<'_> {
    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn attempt(&self) -> u32 {
        self.status.attempts
    }

    pub fn data_dir(&self) -> &DataReference {
        &self.status.data_dir
    }

    pub fn output_dir(&self) -> &DataReference {
        &self.status.output_dir
    }

    pub fn execution_name(&self) -> &str {
        &self.exec_ctx.execution_id.name
    }
}

/// Per-node-type behavior.
pub trait NodeHandler: Send + Sync + 'static {
    /// One-time initialization before the first pass.
    fn setup(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Advance the node by one step.
    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>)
        -> BoxFuture<'a, Result<Transition>>;

    /// Best-effort stop of in-flight work.
    fn abort<'a>(
        &'a self,
        nctx: &'a NodeExecutionContext<'a>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Handlers keyed by node kind.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any existing one for that kind.
    pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: NodeKind) -> Result<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned().ok_or_else(|| SkeinError::InvalidNode {
            node: kind.to_string(),
            message: "no handler registered for node kind".to_string(),
        })
    }

    pub fn kinds(&self) -> Vec<NodeKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    /// Run setup on every registered handler.
    pub async fn setup_all(&self) -> Result<()> {
        for kind in self.kinds() {
            if let Some(handler) = self.handlers.get(&kind) {
                handler.setup().await?;
            }
        }
        Ok(())
    }
}
