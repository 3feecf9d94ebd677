use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::types::{DataReference, NodeId, WorkflowExecutionIdentifier};

/// Node-level lifecycle phase.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    NotYetStarted,
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Aborted,
}

impl Phase {
    /// No further transition happens within the current attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Succeeded | Phase::Failed | Phase::Skipped | Phase::Aborted
        )
    }

    /// Terminal and counts as satisfied for downstream readiness.
    pub fn is_success_like(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Skipped)
    }

    pub fn is_failure_like(self) -> bool {
        matches!(self, Phase::Failed | Phase::Aborted)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::NotYetStarted => "not_yet_started",
            Phase::Queued => "queued",
            Phase::Running => "running",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
            Phase::Skipped => "skipped",
            Phase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Mutable runtime record of one node occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub phase: Phase,
    /// Zero-based attempt counter.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub data_dir: DataReference,
    #[serde(default)]
    pub output_dir: DataReference,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<ExecutionError>,
    #[serde(default)]
    pub branch: Option<BranchNodeState>,
    #[serde(default)]
    pub task: Option<TaskNodeState>,
    #[serde(default)]
    pub workflow: Option<WorkflowNodeState>,
}

impl NodeStatus {
    /// Move to `phase`, stamping the update time.
    pub fn update_phase(&mut self, phase: Phase, message: impl Into<String>) {
        self.phase = phase;
        self.message = message.into();
        self.last_updated_at = Some(Utc::now());
    }

    /// Drop handler sub-state ahead of a new attempt.
    pub fn clear_handler_state(&mut self) {
        self.branch = None;
        self.task = None;
        self.workflow = None;
        self.error = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPhase {
    #[default]
    NotYetEvaluated,
    Evaluating,
    Success,
    Error,
}

/// Branch decision. Fixed once `phase` reaches Success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchNodeState {
    #[serde(default)]
    pub finalized_node_id: Option<NodeId>,
    #[serde(default)]
    pub phase: BranchPhase,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginPhase {
    #[default]
    NotStarted,
    Queued,
    Running,
    Succeeded,
}

/// Outcome of a catalog interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogCacheStatus {
    #[default]
    Disabled,
    Miss,
    Hit,
    Populated,
    PutFailure,
    LookupFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskNodeState {
    #[serde(default)]
    pub plugin_phase: PluginPhase,
    /// Opaque state owned by the plugin.
    #[serde(default)]
    pub plugin_state: serde_json::Value,
    #[serde(default)]
    pub plugin_state_version: u32,
    #[serde(default)]
    pub cache_status: Option<CatalogCacheStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNodePhase {
    #[default]
    Undefined,
    ExecutionStarted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNodeState {
    #[serde(default)]
    pub phase: WorkflowNodePhase,
    #[serde(default)]
    pub launched_execution: Option<WorkflowExecutionIdentifier>,
    /// Status polls in a row that returned no closure.
    #[serde(default)]
    pub consecutive_unknown_polls: u32,
}
