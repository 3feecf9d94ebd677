use std::sync::Arc;

use tracing::{debug, info};

use skein_core::error::{ExecutionError, Result, SkeinError};
use skein_core::lineage::ExecutionContext;
use skein_core::node::{Node, WorkflowSpec};
use skein_core::traits::NodeStatusStore;
use skein_core::types::{LiteralMap, END_NODE_ID, INPUTS_FILE, OUTPUTS_FILE};

use crate::dag::DagStructure;
use crate::executor::NodeExecutor;
use crate::handler::{NodeOutcome, RecursiveNodeExecutor};
use crate::lookup::ContextualNodeLookup;

/// Overall state of a workflow after a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowPhase {
    Running,
    Succeeded,
    Failed(ExecutionError),
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowPhase::Running)
    }
}

/// Runs whole-workflow passes on top of a [`NodeExecutor`].
pub struct WorkflowExecutor {
    nodes: Arc<NodeExecutor>,
}

impl WorkflowExecutor {
    pub fn new(nodes: Arc<NodeExecutor>) -> Self {
        Self { nodes }
    }

    pub fn node_executor(&self) -> &Arc<NodeExecutor> {
        &self.nodes
    }

    /// Write the workflow inputs where the start node reads them.
    pub async fn seed_inputs(
        &self,
        ctx: &ExecutionContext,
        workflow: &WorkflowSpec,
        inputs: &LiteralMap,
    ) -> Result<()> {
        let start_dir = self.nodes.node_data_dir(ctx, workflow.start_node_id())?;
        debug!(workflow = %workflow.id, path = %start_dir, "Seeding workflow inputs");
        self.nodes
            .data_store()
            .write_literals(&start_dir.join(INPUTS_FILE), inputs)
            .await
    }

    /// Drive every reachable node one step from the start node.
    pub async fn execute_pass(
        &self,
        ctx: &ExecutionContext,
        workflow: Arc<WorkflowSpec>,
        statuses: Arc<dyn NodeStatusStore>,
    ) -> Result<WorkflowPhase> {
        let lookup = ContextualNodeLookup::new(workflow.clone(), statuses);
        let start = start_node(&workflow)?;

        let outcome = self
            .nodes
            .recursive_node_handler(ctx, workflow.as_ref(), &lookup, start)
            .await?;

        let phase = match outcome {
            NodeOutcome::Complete => WorkflowPhase::Succeeded,
            NodeOutcome::Failed(err) => WorkflowPhase::Failed(err),
            NodeOutcome::Pending | NodeOutcome::Queued | NodeOutcome::Running => {
                WorkflowPhase::Running
            }
        };
        if phase.is_terminal() {
            info!(execution = %ctx.execution_id, workflow = %workflow.id, phase = ?phase, "Workflow finished");
        }
        Ok(phase)
    }

    /// Abort every in-flight node, starting from the start node.
    pub async fn abort(
        &self,
        ctx: &ExecutionContext,
        workflow: Arc<WorkflowSpec>,
        statuses: Arc<dyn NodeStatusStore>,
        reason: &str,
    ) -> Result<()> {
        let lookup = ContextualNodeLookup::new(workflow.clone(), statuses);
        let start = start_node(&workflow)?;
        info!(execution = %ctx.execution_id, reason = %reason, "Aborting workflow");
        self.nodes
            .abort_handler(ctx, workflow.as_ref(), &lookup, start, reason)
            .await
    }

    /// Outputs collected by the end node, once it has run.
    pub async fn workflow_outputs(
        &self,
        workflow: &WorkflowSpec,
        statuses: Arc<dyn NodeStatusStore>,
    ) -> Result<Option<LiteralMap>> {
        if workflow.node(END_NODE_ID).is_none() {
            return Ok(None);
        }
        let end = statuses.node_status(END_NODE_ID).unwrap_or_default();
        if !end.phase.is_success_like() {
            return Ok(None);
        }
        let path = end.output_dir.join(OUTPUTS_FILE);
        let store = self.nodes.data_store();
        if !store.exists(&path).await? {
            return Ok(None);
        }
        store.read_literals(&path).await.map(Some)
    }
}

fn start_node(workflow: &WorkflowSpec) -> Result<Arc<Node>> {
    workflow
        .start_node()
        .ok_or_else(|| SkeinError::InvalidWorkflow {
            workflow: workflow.id.clone(),
            message: "missing start node".to_string(),
        })
}
