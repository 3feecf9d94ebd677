//! Branch nodes: pick exactly one target node and drive it as a one-node DAG.
//!
//! The decision is evaluated once and stored in the branch status. Later
//! passes only recurse into the finalized target and mirror its phase.

pub mod comparator;

use futures::future::BoxFuture;
use tracing::{debug, info};

use skein_core::error::{codes, ExecutionError, Result, SkeinError};
use skein_core::lineage::{create_parent_info, ExecutionContext};
use skein_core::node::BranchNodeSpec;
use skein_core::status::{BranchNodeState, BranchPhase, Phase};
use skein_core::types::{LiteralMap, NodeId};

use crate::dag::LeafNodeDag;
use crate::handler::{NodeExecutionContext, NodeHandler, NodeOutcome, Transition};

pub use comparator::evaluate;

/// Pick the target of the first matching condition, falling back to the
/// else node. `None` when nothing matches and there is no else node.
pub fn select_target(spec: &BranchNodeSpec, inputs: &LiteralMap) -> Result<Option<NodeId>> {
    if evaluate(&spec.if_block.condition, inputs)? {
        return Ok(Some(spec.if_block.then_node.clone()));
    }
    for block in &spec.else_if {
        if evaluate(&block.condition, inputs)? {
            return Ok(Some(block.then_node.clone()));
        }
    }
    Ok(spec.else_node.clone())
}

pub struct BranchHandler;

impl BranchHandler {
    async fn evaluate_branch(
        &self,
        nctx: &NodeExecutionContext<'_>,
        spec: &BranchNodeSpec,
    ) -> Result<Transition> {
        let inputs = nctx.input_reader.get().await?;
        let error_state = BranchNodeState {
            finalized_node_id: None,
            phase: BranchPhase::Error,
        };

        match select_target(spec, &inputs) {
            Ok(Some(selected)) => {
                info!(node_id = %nctx.node_id(), selected = %selected, "Branch evaluated");
                let unselected = unselected(nctx, spec, &selected);
                let message = format!("selected branch '{}'", selected);
                Ok(Transition::running()
                    .with_message(message)
                    .with_skipped(unselected)
                    .with_branch_state(BranchNodeState {
                        finalized_node_id: Some(selected),
                        phase: BranchPhase::Success,
                    }))
            }
            Ok(None) => {
                let err = spec.else_fail.clone().unwrap_or_else(|| {
                    ExecutionError::user(
                        codes::NO_BRANCH_TAKEN,
                        "no condition matched and no default branch was declared",
                    )
                });
                Ok(Transition::failure(err).with_branch_state(error_state))
            }
            Err(e) => {
                let err = ExecutionError::user(codes::BRANCH_EVALUATION_ERROR, e.to_string());
                Ok(Transition::failure(err).with_branch_state(error_state))
            }
        }
    }

    async fn recurse_to_selected(
        &self,
        nctx: &NodeExecutionContext<'_>,
        state: BranchNodeState,
    ) -> Result<Transition> {
        let selected = finalized_node(nctx, &state)?;
        let child = nctx
            .lookup
            .get_node(&selected)
            .ok_or_else(|| SkeinError::UnknownNode(selected.clone()))?;
        let dag = LeafNodeDag::new(selected.clone(), vec![nctx.node_id().to_string()]);
        let child_ctx = child_context(nctx)?;

        let outcome = nctx
            .executor
            .recursive_node_handler(&child_ctx, &dag, nctx.lookup, child)
            .await?;
        debug!(node_id = %nctx.node_id(), selected = %selected, outcome = ?outcome, "Branch child driven");

        match outcome {
            NodeOutcome::Complete => {
                let child_status = nctx.lookup.get_node_execution_status(&selected);
                Ok(Transition::success()
                    .with_branch_state(state)
                    .with_dirs(child_status.data_dir, child_status.output_dir))
            }
            NodeOutcome::Failed(mut err) => {
                // The child already used its own retries.
                err.recoverable = false;
                Ok(Transition::failure(err).with_branch_state(state))
            }
            _ => Ok(Transition::running().with_branch_state(state)),
        }
    }
}

impl NodeHandler for BranchHandler {
    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>) -> BoxFuture<'a, Result<Transition>> {
        Box::pin(async move {
            let spec = nctx
                .node
                .branch_spec()
                .ok_or_else(|| SkeinError::InvalidNode {
                    node: nctx.node_id().to_string(),
                    message: "not a branch node".to_string(),
                })?;

            let state = nctx.status.branch.clone().unwrap_or_default();
            if state.phase == BranchPhase::Success {
                return self.recurse_to_selected(nctx, state).await;
            }
            self.evaluate_branch(nctx, spec).await
        })
    }

    fn abort<'a>(
        &'a self,
        nctx: &'a NodeExecutionContext<'a>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let state = match &nctx.status.branch {
                Some(state) if state.phase == BranchPhase::Success => state,
                _ => {
                    debug!(node_id = %nctx.node_id(), "Branch not finalized, nothing to abort");
                    return Ok(());
                }
            };

            let selected = finalized_node(nctx, state)?;
            let child = nctx
                .lookup
                .get_node(&selected)
                .ok_or_else(|| SkeinError::UnknownNode(selected.clone()))?;
            let dag = LeafNodeDag::new(selected, vec![nctx.node_id().to_string()]);
            let child_ctx = child_context(nctx)?;

            nctx.executor
                .abort_handler(&child_ctx, &dag, nctx.lookup, child, reason)
                .await
        })
    }
}

fn finalized_node(nctx: &NodeExecutionContext<'_>, state: &BranchNodeState) -> Result<NodeId> {
    state
        .finalized_node_id
        .clone()
        .ok_or_else(|| SkeinError::InvalidNode {
            node: nctx.node_id().to_string(),
            message: "branch finalized without a selected node".to_string(),
        })
}

/// Children of the branch carry the branch occurrence in their lineage.
fn child_context(nctx: &NodeExecutionContext<'_>) -> Result<ExecutionContext> {
    let parent_info = create_parent_info(
        nctx.exec_ctx.parent_info.as_ref(),
        nctx.node_id(),
        nctx.attempt(),
    )?;
    Ok(nctx.exec_ctx.with_parent_info(parent_info))
}

/// Candidates other than `selected` that have not started yet.
fn unselected(nctx: &NodeExecutionContext<'_>, spec: &BranchNodeSpec, selected: &str) -> Vec<NodeId> {
    spec.candidates()
        .into_iter()
        .filter(|candidate| candidate.as_str() != selected)
        .filter(|candidate| nctx.lookup.get_node_execution_status(candidate).phase == Phase::NotYetStarted)
        .map(|candidate| candidate.to_string())
        .collect()
}
