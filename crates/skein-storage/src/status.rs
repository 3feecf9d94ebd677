use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use skein_core::status::NodeStatus;
use skein_core::traits::NodeStatusStore;
use skein_core::types::NodeId;

/// Status arena backed by a map. One instance per workflow execution.
#[derive(Default)]
pub struct InMemoryStatusStore {
    statuses: RwLock<BTreeMap<NodeId, NodeStatus>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the arena, e.g. from a persisted snapshot.
    pub fn from_snapshot(statuses: BTreeMap<NodeId, NodeStatus>) -> Self {
        Self {
            statuses: RwLock::new(statuses),
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeStatusStore for InMemoryStatusStore {
    fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node_id)
            .cloned()
    }

    fn set_node_status(&self, node_id: &str, status: NodeStatus) {
        self.statuses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node_id.to_string(), status);
    }

    fn snapshot(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.statuses.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// View of another store where every key lives under a prefix.
/// Nested workflows use it so their node ids never clash with the parent's.
pub struct ScopedStatusStore {
    prefix: String,
    inner: Arc<dyn NodeStatusStore>,
}

impl ScopedStatusStore {
    pub fn new(inner: Arc<dyn NodeStatusStore>, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    fn key(&self, node_id: &str) -> String {
        format!("{}/{}", self.prefix, node_id)
    }
}

impl NodeStatusStore for ScopedStatusStore {
    fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.inner.node_status(&self.key(node_id))
    }

    fn set_node_status(&self, node_id: &str, status: NodeStatus) {
        self.inner.set_node_status(&self.key(node_id), status);
    }

    fn snapshot(&self) -> BTreeMap<NodeId, NodeStatus> {
        let scope = format!("{}/", self.prefix);
        self.inner
            .snapshot()
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(&scope).map(|local| (local.to_string(), v)))
            .collect()
    }
}
