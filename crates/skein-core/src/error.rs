use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
    // Graph errors
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Invalid workflow {workflow}: {message}")]
    InvalidWorkflow { workflow: String, message: String },

    #[error("Invalid node {node}: {message}")]
    InvalidNode { node: String, message: String },

    #[error("Lineage error: {0}")]
    Lineage(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data not found: {0}")]
    DataNotFound(String),

    // Catalog errors
    #[error("Catalog entry not found: {0}")]
    CatalogNotFound(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    // Remote launch errors
    #[error("Execution already exists: {0}")]
    ExecutionAlreadyExists(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Launch rejected: {0}")]
    LaunchRejected(String),

    #[error("Remote launch backend error: {0}")]
    RemoteLaunch(String),

    // Plugin errors
    #[error("Unsupported task type: {0}")]
    UnsupportedTaskType(String),

    #[error("Plugin error: {plugin}: {message}")]
    Plugin { plugin: String, message: String },

    // Expression errors
    #[error("Expression error: {0}")]
    Expression(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkeinError {
    /// The remote side already has an execution with the requested id.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SkeinError::ExecutionAlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SkeinError::ExecutionNotFound(_) | SkeinError::DataNotFound(_)
        )
    }

    pub fn is_catalog_not_found(&self) -> bool {
        matches!(self, SkeinError::CatalogNotFound(_))
    }

    /// Failures attributable to the workflow definition or its remote execution.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SkeinError::LaunchRejected(_) | SkeinError::Expression(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SkeinError>;

/// Who is to blame for a failed node occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    User,
    System,
    #[default]
    Unknown,
}

/// Structured error attached to every Failed (and Aborted) node status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub kind: ErrorKind,
    /// Recoverable errors may trigger a new attempt of the same node.
    #[serde(default)]
    pub recoverable: bool,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind,
            recoverable: false,
        }
    }

    pub fn user(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User, code, message)
    }

    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, code, message)
    }

    pub fn unknown() -> Self {
        Self::new(ErrorKind::Unknown, codes::UNKNOWN, "Unknown")
    }

    /// Mark the error as retryable at the task level.
    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    /// Bound the message length so arbitrarily long plugin output never reaches storage.
    pub fn trimmed(mut self, max_len: usize) -> Self {
        self.message = trim_error_message(&self.message, max_len);
        self
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Keep the head and tail of an over-long message, joined by a marker.
pub fn trim_error_message(message: &str, max_len: usize) -> String {
    if message.len() <= max_len {
        return message.to_string();
    }
    let marker = "\n...\n";
    if max_len <= marker.len() {
        return message[..floor_char_boundary(message, max_len)].to_string();
    }
    let budget = max_len - marker.len();
    let head_len = floor_char_boundary(message, budget / 2);
    let tail_start = ceil_char_boundary(message, message.len() - (budget - head_len));
    format!("{}{}{}", &message[..head_len], marker, &message[tail_start..])
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Well-known error codes recorded on node statuses.
pub mod codes {
    pub const UNKNOWN: &str = "Unknown";
    pub const OUTPUTS_NOT_GENERATED: &str = "OutputsNotGenerated";
    pub const OUTPUTS_NOT_FOUND: &str = "OutputsNotFound";
    pub const RUNTIME_EXECUTION_ERROR: &str = "RuntimeExecutionError";
    pub const REMOTE_CHILD_WORKFLOW_EXECUTION_FAILED: &str = "RemoteChildWorkflowExecutionFailed";
    pub const LAUNCH_PLAN_EXECUTION_FAILED: &str = "LaunchPlanExecutionFailed";
    pub const SUB_WORKFLOW_EXECUTION_FAILED: &str = "SubWorkflowExecutionFailed";
    pub const NO_BRANCH_TAKEN: &str = "NoBranchTaken";
    pub const BRANCH_EVALUATION_ERROR: &str = "BranchEvaluationError";
    pub const BINDING_RESOLUTION_ERROR: &str = "BindingResolutionError";
    pub const UPSTREAM_FAILED: &str = "UpstreamNodeFailed";
    pub const TIMEOUT: &str = "Timeout";
    pub const ABORTED: &str = "Aborted";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_short_message_untouched() {
        assert_eq!(trim_error_message("boom", 10), "boom");
    }

    #[test]
    fn test_trim_long_message_keeps_head_and_tail() {
        let msg = format!("{}{}", "a".repeat(50), "z".repeat(50));
        let trimmed = trim_error_message(&msg, 25);
        assert_eq!(trimmed.len(), 25);
        assert!(trimmed.starts_with("aaaa"));
        assert!(trimmed.ends_with("zzzz"));
        assert!(trimmed.contains("..."));
    }

    #[test]
    fn test_trim_respects_char_boundaries() {
        let msg = "é".repeat(40);
        let trimmed = trim_error_message(&msg, 21);
        assert!(trimmed.len() <= 21);
    }

    #[test]
    fn test_trim_below_marker_length_is_byte_bounded() {
        let msg = "é".repeat(10);
        let trimmed = trim_error_message(&msg, 3);
        assert_eq!(trimmed, "é");
        assert!(trimmed.len() <= 3);
    }

    #[test]
    fn test_error_classification() {
        assert!(SkeinError::ExecutionAlreadyExists("x".into()).is_already_exists());
        assert!(SkeinError::ExecutionNotFound("x".into()).is_not_found());
        assert!(SkeinError::LaunchRejected("bad inputs".into()).is_user_error());
        assert!(!SkeinError::RemoteLaunch("503".into()).is_user_error());
        assert!(SkeinError::CatalogNotFound("k".into()).is_catalog_not_found());
    }

    #[test]
    fn test_execution_error_builders() {
        let err = ExecutionError::user("Code", "msg").recoverable();
        assert_eq!(err.kind, ErrorKind::User);
        assert!(err.recoverable);
        assert_eq!(err.to_string(), "[Code] msg");
    }
}
