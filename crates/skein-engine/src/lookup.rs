use std::collections::BTreeMap;
use std::sync::Arc;

use skein_core::node::{Node, WorkflowSpec};
use skein_core::status::NodeStatus;
use skein_core::traits::NodeStatusStore;
use skein_core::types::NodeId;
use skein_storage::InMemoryStatusStore;

/// Source of static node definitions.
pub trait NodeGetter: Send + Sync {
    fn get_node(&self, id: &str) -> Option<Arc<Node>>;
}

impl NodeGetter for WorkflowSpec {
    fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.node(id)
    }
}

/// Node definitions plus their mutable runtime statuses.
pub trait NodeLookup: Send + Sync {
    fn get_node(&self, id: &str) -> Option<Arc<Node>>;

    /// Never fails: a node without a record is reported as not yet started.
    fn get_node_execution_status(&self, id: &str) -> NodeStatus;

    fn update_node_execution_status(&self, id: &str, status: NodeStatus);

    /// Backing store, used to scope nested workflows.
    fn status_store(&self) -> Arc<dyn NodeStatusStore>;
}

/// Binds a definition source to a status store.
pub struct ContextualNodeLookup {
    nodes: Arc<dyn NodeGetter>,
    statuses: Arc<dyn NodeStatusStore>,
}

impl ContextualNodeLookup {
    pub fn new(nodes: Arc<dyn NodeGetter>, statuses: Arc<dyn NodeStatusStore>) -> Self {
        Self { nodes, statuses }
    }
}

impl NodeLookup for ContextualNodeLookup {
    fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get_node(id)
    }

    fn get_node_execution_status(&self, id: &str) -> NodeStatus {
        self.statuses.node_status(id).unwrap_or_default()
    }

    fn update_node_execution_status(&self, id: &str, status: NodeStatus) {
        self.statuses.set_node_status(id, status);
    }

    fn status_store(&self) -> Arc<dyn NodeStatusStore> {
        self.statuses.clone()
    }
}

/// Lookup over fixed in-memory maps, for synthetic views and tests.
pub struct FixtureNodeLookup {
    nodes: BTreeMap<NodeId, Arc<Node>>,
    statuses: Arc<InMemoryStatusStore>,
}

impl FixtureNodeLookup {
    pub fn new(nodes: Vec<Node>, statuses: BTreeMap<NodeId, NodeStatus>) -> Self {
        Self {
            nodes: nodes
                .into_iter()
                .map(|n| (n.id.clone(), Arc::new(n)))
                .collect(),
            statuses: Arc::new(InMemoryStatusStore::from_snapshot(statuses)),
        }
    }

    pub fn statuses(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.statuses.snapshot()
    }
}

impl NodeLookup for FixtureNodeLookup {
    fn get_node(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).cloned()
    }

    fn get_node_execution_status(&self, id: &str) -> NodeStatus {
        self.statuses.node_status(id).unwrap_or_default()
    }

    fn update_node_execution_status(&self, id: &str, status: NodeStatus) {
        self.statuses.set_node_status(id, status);
    }

    fn status_store(&self) -> Arc<dyn NodeStatusStore> {
        self.statuses.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::node::TaskTemplate;
    use skein_core::status::Phase;
    use skein_core::types::{Identifier, START_NODE_ID};

    #[test]
    fn test_missing_status_defaults_to_not_started() {
        let lookup = FixtureNodeLookup::new(vec![], BTreeMap::new());
        let status = lookup.get_node_execution_status("n1");
        assert_eq!(status.phase, Phase::NotYetStarted);
        assert!(lookup.get_node("n1").is_none());
    }

    #[test]
    fn test_fixture_lookup_updates() {
        let task = TaskTemplate::new(Identifier::task("t", "1"), "echo");
        let lookup = FixtureNodeLookup::new(vec![Node::task("n1", task)], BTreeMap::new());
        let mut status = NodeStatus::default();
        status.phase = Phase::Running;
        lookup.update_node_execution_status("n1", status);

        assert_eq!(lookup.get_node_execution_status("n1").phase, Phase::Running);
        assert!(lookup.get_node("n1").is_some());
        assert_eq!(lookup.statuses().len(), 1);
    }

    #[test]
    fn test_contextual_lookup() {
        let wf = WorkflowSpec::new("wf", vec![Node::start()]).unwrap();
        let store = Arc::new(InMemoryStatusStore::new());
        let lookup = ContextualNodeLookup::new(Arc::new(wf), store.clone());

        assert!(lookup.get_node(START_NODE_ID).is_some());
        let mut status = NodeStatus::default();
        status.phase = Phase::Succeeded;
        lookup.update_node_execution_status(START_NODE_ID, status);
        assert_eq!(store.node_status(START_NODE_ID).unwrap().phase, Phase::Succeeded);
    }
}
