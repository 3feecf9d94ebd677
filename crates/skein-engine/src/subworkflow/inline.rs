use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use skein_core::error::{codes, ExecutionError, Result, SkeinError};
use skein_core::lineage::{create_parent_info, ExecutionContext};
use skein_core::node::WorkflowSpec;
use skein_core::status::WorkflowNodePhase;
use skein_core::types::{END_NODE_ID, INPUTS_FILE, OUTPUTS_FILE};
use skein_storage::ScopedStatusStore;

use crate::dag::DagStructure;
use crate::handler::{NodeExecutionContext, NodeHandler, NodeOutcome, Transition};
use crate::lookup::{ContextualNodeLookup, NodeLookup};

/// Drives a nested workflow in place. Nested statuses live in the parent's
/// status store under a prefix owned by this node occurrence.
pub struct SubWorkflowHandler;

struct Nested {
    spec: Arc<WorkflowSpec>,
    ctx: ExecutionContext,
    lookup: ContextualNodeLookup,
}

impl Nested {
    fn new(nctx: &NodeExecutionContext<'_>) -> Result<Self> {
        let spec = nctx
            .node
            .sub_workflow_spec()
            .ok_or_else(|| SkeinError::InvalidNode {
                node: nctx.node_id().to_string(),
                message: "not a sub-workflow node".to_string(),
            })?;
        let spec = Arc::new(spec.clone());

        let parent_info = create_parent_info(
            nctx.exec_ctx.parent_info.as_ref(),
            nctx.node_id(),
            nctx.attempt(),
        )?;
        let ctx = nctx.exec_ctx.with_parent_info(parent_info);

        let scope = format!("{}/{}", nctx.unique_id, nctx.attempt());
        let statuses = Arc::new(ScopedStatusStore::new(nctx.lookup.status_store(), scope));
        let lookup = ContextualNodeLookup::new(spec.clone(), statuses);

        Ok(Self { spec, ctx, lookup })
    }
}

impl NodeHandler for SubWorkflowHandler {
    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>) -> BoxFuture<'a, Result<Transition>> {
        Box::pin(async move {
            let nested = Nested::new(nctx)?;
            let mut state = nctx.status.workflow.clone().unwrap_or_default();

            if state.phase == WorkflowNodePhase::Undefined {
                let inputs = nctx.input_reader.get().await?;
                let start_dir = nctx
                    .executor
                    .node_data_dir(&nested.ctx, nested.spec.start_node_id())?;
                nctx.data_store
                    .write_literals(&start_dir.join(INPUTS_FILE), &inputs)
                    .await?;
                state.phase = WorkflowNodePhase::ExecutionStarted;
                info!(node_id = %nctx.node_id(), workflow = %nested.spec.id, "Starting sub-workflow");
            }

            let start = nested.spec.start_node().ok_or_else(|| SkeinError::InvalidWorkflow {
                workflow: nested.spec.id.clone(),
                message: "missing start node".to_string(),
            })?;
            let outcome = nctx
                .executor
                .recursive_node_handler(&nested.ctx, nested.spec.as_ref(), &nested.lookup, start)
                .await?;
            debug!(node_id = %nctx.node_id(), outcome = ?outcome, "Sub-workflow pass finished");

            match outcome {
                NodeOutcome::Complete => {
                    if nested.spec.node(END_NODE_ID).is_some() {
                        let end = nested.lookup.get_node_execution_status(END_NODE_ID);
                        let source = end.output_dir.join(OUTPUTS_FILE);
                        if nctx.data_store.exists(&source).await? {
                            let target = nctx.output_dir().join(OUTPUTS_FILE);
                            nctx.data_store.copy_raw(&source, &target).await?;
                        }
                    }
                    Ok(Transition::success().with_workflow_state(state))
                }
                NodeOutcome::Failed(err) => {
                    let wrapped = ExecutionError::new(
                        err.kind,
                        codes::SUB_WORKFLOW_EXECUTION_FAILED,
                        format!("sub-workflow [{}] failed: {}", nested.spec.id, err),
                    );
                    Ok(Transition::failure(wrapped).with_workflow_state(state))
                }
                _ => Ok(Transition::running().with_workflow_state(state)),
            }
        })
    }

    fn abort<'a>(
        &'a self,
        nctx: &'a NodeExecutionContext<'a>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let started = nctx
                .status
                .workflow
                .as_ref()
                .map(|s| s.phase == WorkflowNodePhase::ExecutionStarted)
                .unwrap_or(false);
            if !started {
                return Ok(());
            }

            let nested = Nested::new(nctx)?;
            let Some(start) = nested.spec.start_node() else {
                return Ok(());
            };
            nctx.executor
                .abort_handler(&nested.ctx, nested.spec.as_ref(), &nested.lookup, start, reason)
                .await
        })
    }
}
