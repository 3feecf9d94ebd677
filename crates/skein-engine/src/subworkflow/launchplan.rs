use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use skein_core::error::{codes, ErrorKind, ExecutionError, Result, SkeinError};
use skein_core::status::{WorkflowNodePhase, WorkflowNodeState};
use skein_core::traits::{
    ExecutionOutputs, LaunchContext, LaunchPlanExecutor, WorkflowExecutionPhase,
};
use skein_core::types::{WorkflowExecutionIdentifier, OUTPUTS_FILE};

use super::{child_execution_id, parent_node_execution_id};
use crate::handler::{NodeExecutionContext, NodeHandler, Transition};

/// Runs a launch plan as a separate execution on the remote backend and
/// follows it until it finishes.
pub struct LaunchPlanHandler {
    launch_plans: Arc<dyn LaunchPlanExecutor>,
}

impl LaunchPlanHandler {
    pub fn new(launch_plans: Arc<dyn LaunchPlanExecutor>) -> Self {
        Self { launch_plans }
    }

    fn child_id(&self, nctx: &NodeExecutionContext<'_>) -> Result<WorkflowExecutionIdentifier> {
        let parent = parent_node_execution_id(nctx.exec_ctx, nctx.node_id())?;
        child_execution_id(&parent, nctx.attempt())
    }

    async fn start(&self, nctx: &NodeExecutionContext<'_>) -> Result<Transition> {
        let inputs = match nctx.input_reader.get().await {
            Ok(inputs) => inputs,
            Err(e) => {
                return Ok(Transition::failure(ExecutionError::system(
                    codes::RUNTIME_EXECUTION_ERROR,
                    format!("Failed to read input. Error [{}]", e),
                )));
            }
        };

        let launch_plan = nctx
            .node
            .launch_plan_ref()
            .ok_or_else(|| SkeinError::InvalidNode {
                node: nctx.node_id().to_string(),
                message: "not a launch plan node".to_string(),
            })?;
        let parent = parent_node_execution_id(nctx.exec_ctx, nctx.node_id())?;
        let child_id = child_execution_id(&parent, nctx.attempt())?;
        let launch_ctx = LaunchContext {
            principal: "unknown".to_string(),
            nesting_level: 0,
            parent_node_execution: parent,
        };

        let state = WorkflowNodeState {
            phase: WorkflowNodePhase::ExecutionStarted,
            launched_execution: Some(child_id.clone()),
            consecutive_unknown_polls: 0,
        };

        match self
            .launch_plans
            .launch(launch_ctx, child_id.clone(), launch_plan.clone(), inputs)
            .await
        {
            Ok(()) => {
                info!(node_id = %nctx.node_id(), child = %child_id, launch_plan = %launch_plan, "Launched launch plan");
            }
            Err(e) if e.is_already_exists() => {
                info!(node_id = %nctx.node_id(), child = %child_id, "Execution already exists");
            }
            Err(e) if e.is_user_error() => {
                let err = ExecutionError::user(codes::RUNTIME_EXECUTION_ERROR, e.to_string());
                return Ok(Transition::failure(err).with_workflow_state(WorkflowNodeState {
                    phase: WorkflowNodePhase::Undefined,
                    ..state
                }));
            }
            Err(e) => return Err(e),
        }

        Ok(Transition::running()
            .with_message(format!("launched execution {}", child_id.name))
            .with_workflow_state(state))
    }

    async fn check_status(
        &self,
        nctx: &NodeExecutionContext<'_>,
        mut state: WorkflowNodeState,
    ) -> Result<Transition> {
        let child_id = self.child_id(nctx)?;
        state.launched_execution = Some(child_id.clone());

        let closure = match self.launch_plans.get_status(&child_id).await {
            Ok(closure) => closure,
            Err(e) if e.is_not_found() => {
                let err = ExecutionError::system(
                    codes::RUNTIME_EXECUTION_ERROR,
                    format!("launch-plan not found: {}", e),
                );
                return Ok(Transition::failure(err).with_workflow_state(state));
            }
            Err(e) => return Err(e),
        };

        let closure = match closure {
            Some(closure) => closure,
            None => {
                state.consecutive_unknown_polls += 1;
                warn!(
                    node_id = %nctx.node_id(),
                    child = %child_id,
                    polls = state.consecutive_unknown_polls,
                    "Launch plan status unavailable, the backend cache may be under pressure"
                );
                return Ok(Transition::indeterminate("launch plan status unavailable")
                    .with_workflow_state(state));
            }
        };
        state.consecutive_unknown_polls = 0;
        debug!(node_id = %nctx.node_id(), child = %child_id, phase = ?closure.phase, "Polled launch plan");

        match closure.phase {
            WorkflowExecutionPhase::Aborted => {
                let err = ExecutionError::system(
                    codes::REMOTE_CHILD_WORKFLOW_EXECUTION_FAILED,
                    format!("launchplan [{}] aborted", child_id.name),
                );
                Ok(Transition::failure(err).with_workflow_state(state))
            }
            WorkflowExecutionPhase::Failed => {
                let err = closure.error.unwrap_or_else(|| {
                    ExecutionError::new(
                        ErrorKind::Unknown,
                        codes::LAUNCH_PLAN_EXECUTION_FAILED,
                        "Unknown Error",
                    )
                });
                Ok(Transition::failure(err).with_workflow_state(state))
            }
            WorkflowExecutionPhase::Succeeded => {
                let outputs_path = nctx.output_dir().join(OUTPUTS_FILE);
                match closure.outputs {
                    Some(ExecutionOutputs::Uri(uri)) => {
                        if let Err(e) = nctx.data_store.copy_raw(&uri, &outputs_path).await {
                            warn!(node_id = %nctx.node_id(), uri = %uri, error = %e, "Remote launch plan outputs not found");
                            return Err(SkeinError::Storage(format!(
                                "remote output for launchplan execution was not found, uri [{}]: {}",
                                uri, e
                            )));
                        }
                    }
                    Some(ExecutionOutputs::Values(values)) => {
                        nctx.data_store.write_literals(&outputs_path, &values).await?;
                    }
                    None => {}
                }
                info!(node_id = %nctx.node_id(), child = %child_id, "Launch plan execution succeeded");
                Ok(Transition::success().with_workflow_state(state))
            }
            _ => Ok(Transition::running().with_workflow_state(state)),
        }
    }
}

impl NodeHandler for LaunchPlanHandler {
    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>) -> BoxFuture<'a, Result<Transition>> {
        Box::pin(async move {
            let state = nctx.status.workflow.clone().unwrap_or_default();
            match state.phase {
                WorkflowNodePhase::Undefined => self.start(nctx).await,
                WorkflowNodePhase::ExecutionStarted => self.check_status(nctx, state).await,
            }
        })
    }

    fn abort<'a>(
        &'a self,
        nctx: &'a NodeExecutionContext<'a>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let child_id = self.child_id(nctx)?;
            let message = format!(
                "cascading abort as parent execution id [{}] aborted, reason [{}]",
                nctx.execution_name(),
                reason
            );
            info!(node_id = %nctx.node_id(), child = %child_id, "Killing launched execution");
            self.launch_plans.kill(&child_id, &message).await
        })
    }
}
