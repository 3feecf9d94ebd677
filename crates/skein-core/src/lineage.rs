//! Lineage model: deterministic, length-bounded ids for node occurrences.
//!
//! A node occurrence is identified by its ancestry chain. The unique id of a
//! node is derived from the parent's unique id, the parent's attempt and the
//! local node id, so the same chain always produces the same id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SkeinError};
use crate::types::WorkflowExecutionIdentifier;

/// Upper bound on generated unique ids.
pub const MAX_UNIQUE_ID_LENGTH: usize = 20;

/// Hex characters kept from the digest when an id is too long.
const HASH_LEN: usize = 8;

/// One ancestor node occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentInfo {
    unique_id: String,
    current_attempt: u32,
}

impl ParentInfo {
    pub fn new(unique_id: impl Into<String>, current_attempt: u32) -> Self {
        Self {
            unique_id: unique_id.into(),
            current_attempt,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

/// Which node-execution id scheme events and child launches use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventVersion {
    /// Local node ids.
    #[default]
    V0,
    /// Lineage unique ids.
    V1,
}

/// Execution-wide metadata plus the current lineage. Immutable per activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: WorkflowExecutionIdentifier,
    #[serde(default)]
    pub event_version: EventVersion,
    #[serde(default)]
    pub parent_info: Option<ParentInfo>,
}

impl ExecutionContext {
    pub fn new(execution_id: WorkflowExecutionIdentifier) -> Self {
        Self {
            execution_id,
            event_version: EventVersion::default(),
            parent_info: None,
        }
    }

    pub fn with_event_version(mut self, version: EventVersion) -> Self {
        self.event_version = version;
        self
    }

    /// Derive a child context. The receiver is left untouched.
    pub fn with_parent_info(&self, parent_info: ParentInfo) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            event_version: self.event_version,
            parent_info: Some(parent_info),
        }
    }
}

/// Unique id of `node_id` under the given parent.
pub fn generate_unique_id(parent: Option<&ParentInfo>, node_id: &str) -> Result<String> {
    let (parent_id, parent_attempt) = match parent {
        Some(p) => (p.unique_id.clone(), p.current_attempt.to_string()),
        None => (String::new(), String::new()),
    };
    fixed_length_unique_id_for_parts(
        MAX_UNIQUE_ID_LENGTH,
        &[parent_id.as_str(), parent_attempt.as_str(), node_id],
    )
}

/// Parent info for children of `node_id`. The node's own unique id depends on
/// the grandparent, which keeps the full chain in every descendant's id.
pub fn create_parent_info(
    grand_parent: Option<&ParentInfo>,
    node_id: &str,
    attempt: u32,
) -> Result<ParentInfo> {
    let unique_id = generate_unique_id(grand_parent, node_id)?;
    Ok(ParentInfo::new(unique_id, attempt))
}

/// Join the non-empty parts with `-`. Results longer than `max_len` are
/// replaced by `f` followed by a truncated SHA-256 digest of the joined string,
/// so distinct long inputs may collide.
pub fn fixed_length_unique_id_for_parts(max_len: usize, parts: &[&str]) -> Result<String> {
    if max_len < HASH_LEN + 1 {
        return Err(SkeinError::Lineage(format!(
            "max length {} is below the minimum of {}",
            max_len,
            HASH_LEN + 1
        )));
    }

    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-");

    if joined.len() <= max_len {
        return Ok(joined);
    }

    let digest = Sha256::digest(joined.as_bytes());
    let encoded = hex::encode(digest);
    Ok(format!("f{}", &encoded[..HASH_LEN]))
}
