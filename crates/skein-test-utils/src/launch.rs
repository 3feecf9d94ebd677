use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use skein_core::error::{Result, SkeinError};
use skein_core::traits::{
    ExecutionClosure, ExecutionOutputs, LaunchContext, LaunchPlanExecutor, WorkflowExecutionPhase,
};
use skein_core::types::{Identifier, LiteralMap, WorkflowExecutionIdentifier};

/// Scripted answer to `launch`.
#[derive(Debug, Clone)]
pub enum LaunchResponse {
    Accepted,
    AlreadyExists,
    Rejected(String),
    Unavailable(String),
}

/// Scripted answer to `get_status`.
#[derive(Debug, Clone)]
pub enum StatusResponse {
    Closure(ExecutionClosure),
    /// The backend has no closure yet.
    Missing,
    NotFound,
    Unavailable(String),
}

impl StatusResponse {
    pub fn phase(phase: WorkflowExecutionPhase) -> Self {
        StatusResponse::Closure(ExecutionClosure {
            phase,
            ..Default::default()
        })
    }

    pub fn succeeded_with(outputs: LiteralMap) -> Self {
        StatusResponse::Closure(ExecutionClosure {
            phase: WorkflowExecutionPhase::Succeeded,
            outputs: Some(ExecutionOutputs::Values(outputs)),
            error: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub ctx: LaunchContext,
    pub execution_id: WorkflowExecutionIdentifier,
    pub launch_plan: Identifier,
    pub inputs: LiteralMap,
}

/// Launch backend that replays scripted responses and records every call.
/// Once a script runs out, its last response repeats.
pub struct MockLaunchPlanExecutor {
    launch_script: Mutex<VecDeque<LaunchResponse>>,
    last_launch: Mutex<LaunchResponse>,
    status_script: Mutex<VecDeque<StatusResponse>>,
    last_status: Mutex<StatusResponse>,
    launches: Mutex<Vec<LaunchRecord>>,
    status_calls: Mutex<Vec<WorkflowExecutionIdentifier>>,
    kills: Mutex<Vec<(WorkflowExecutionIdentifier, String)>>,
}

impl Default for MockLaunchPlanExecutor {
    fn default() -> Self {
        Self {
            launch_script: Mutex::new(VecDeque::new()),
            last_launch: Mutex::new(LaunchResponse::Accepted),
            status_script: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(StatusResponse::phase(WorkflowExecutionPhase::Running)),
            launches: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            kills: Mutex::new(Vec::new()),
        }
    }
}

impl MockLaunchPlanExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_launch(self, response: LaunchResponse) -> Self {
        self.launch_script.lock().unwrap().push_back(response);
        self
    }

    pub fn on_status(self, response: StatusResponse) -> Self {
        self.status_script.lock().unwrap().push_back(response);
        self
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<WorkflowExecutionIdentifier> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<(WorkflowExecutionIdentifier, String)> {
        self.kills.lock().unwrap().clone()
    }

    fn next_launch(&self) -> LaunchResponse {
        let next = self.launch_script.lock().unwrap().pop_front();
        let mut last = self.last_launch.lock().unwrap();
        if let Some(next) = next {
            *last = next;
        }
        last.clone()
    }

    fn next_status(&self) -> StatusResponse {
        let next = self.status_script.lock().unwrap().pop_front();
        let mut last = self.last_status.lock().unwrap();
        if let Some(next) = next {
            *last = next;
        }
        last.clone()
    }
}

impl LaunchPlanExecutor for MockLaunchPlanExecutor {
    fn launch(
        &self,
        ctx: LaunchContext,
        execution_id: WorkflowExecutionIdentifier,
        launch_plan: Identifier,
        inputs: LiteralMap,
    ) -> BoxFuture<'_, Result<()>> {
        let name = execution_id.name.clone();
        self.launches.lock().unwrap().push(LaunchRecord {
            ctx,
            execution_id,
            launch_plan,
            inputs,
        });
        let result = match self.next_launch() {
            LaunchResponse::Accepted => Ok(()),
            LaunchResponse::AlreadyExists => Err(SkeinError::ExecutionAlreadyExists(name)),
            LaunchResponse::Rejected(msg) => Err(SkeinError::LaunchRejected(msg)),
            LaunchResponse::Unavailable(msg) => Err(SkeinError::RemoteLaunch(msg)),
        };
        Box::pin(async move { result })
    }

    fn get_status(
        &self,
        execution_id: &WorkflowExecutionIdentifier,
    ) -> BoxFuture<'_, Result<Option<ExecutionClosure>>> {
        self.status_calls.lock().unwrap().push(execution_id.clone());
        let result = match self.next_status() {
            StatusResponse::Closure(closure) => Ok(Some(closure)),
            StatusResponse::Missing => Ok(None),
            StatusResponse::NotFound => {
                Err(SkeinError::ExecutionNotFound(execution_id.name.clone()))
            }
            StatusResponse::Unavailable(msg) => Err(SkeinError::RemoteLaunch(msg)),
        };
        Box::pin(async move { result })
    }

    fn kill(
        &self,
        execution_id: &WorkflowExecutionIdentifier,
        reason: &str,
    ) -> BoxFuture<'_, Result<()>> {
        self.kills
            .lock()
            .unwrap()
            .push((execution_id.clone(), reason.to_string()));
        Box::pin(async { Ok(()) })
    }
}
