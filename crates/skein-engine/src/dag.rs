use std::sync::Arc;

use skein_core::error::{Result, SkeinError};
use skein_core::node::{Node, WorkflowSpec};
use skein_core::types::NodeId;

/// Read-only adjacency view used by the traversal.
pub trait DagStructure: Send + Sync {
    /// Traversal root, if this view has one.
    fn start_node(&self) -> Option<Arc<Node>>;

    /// Predecessors of `id`.
    fn to_node(&self, id: &str) -> Result<Vec<NodeId>>;

    /// Successors of `id`.
    fn from_node(&self, id: &str) -> Result<Vec<NodeId>>;
}

impl DagStructure for WorkflowSpec {
    fn start_node(&self) -> Option<Arc<Node>> {
        self.node(self.start_node_id())
    }

    fn to_node(&self, id: &str) -> Result<Vec<NodeId>> {
        self.upstream_of(id)
            .map(|ids| ids.to_vec())
            .ok_or_else(|| SkeinError::UnknownNode(id.to_string()))
    }

    fn from_node(&self, id: &str) -> Result<Vec<NodeId>> {
        self.downstream_of(id)
            .map(|ids| ids.to_vec())
            .ok_or_else(|| SkeinError::UnknownNode(id.to_string()))
    }
}

/// A single node reached from a fixed set of parents, with no outgoing edges.
/// Lets a handler drive one selected node with the regular traversal.
#[derive(Debug, Clone)]
pub struct LeafNodeDag {
    leaf: NodeId,
    parents: Vec<NodeId>,
}

impl LeafNodeDag {
    pub fn new(leaf: impl Into<String>, parents: Vec<NodeId>) -> Self {
        Self {
            leaf: leaf.into(),
            parents,
        }
    }
}

impl DagStructure for LeafNodeDag {
    fn start_node(&self) -> Option<Arc<Node>> {
        None
    }

    fn to_node(&self, id: &str) -> Result<Vec<NodeId>> {
        if id == self.leaf {
            return Ok(self.parents.clone());
        }
        Err(SkeinError::UnknownNode(id.to_string()))
    }

    fn from_node(&self, _id: &str) -> Result<Vec<NodeId>> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::node::TaskTemplate;
    use skein_core::types::{Identifier, END_NODE_ID, START_NODE_ID};

    fn workflow() -> WorkflowSpec {
        let task = TaskTemplate::new(Identifier::task("t", "1"), "echo");
        WorkflowSpec::new(
            "wf",
            vec![
                Node::start(),
                Node::task("n1", task).after(&[START_NODE_ID]),
                Node::end().after(&["n1"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_workflow_dag() {
        let wf = workflow();
        assert_eq!(wf.start_node().unwrap().id, START_NODE_ID);
        assert_eq!(wf.to_node("n1").unwrap(), vec![START_NODE_ID.to_string()]);
        assert_eq!(wf.from_node("n1").unwrap(), vec![END_NODE_ID.to_string()]);
    }

    #[test]
    fn test_workflow_dag_unknown_node() {
        let wf = workflow();
        assert!(matches!(wf.to_node("ghost"), Err(SkeinError::UnknownNode(_))));
        assert!(matches!(wf.from_node("ghost"), Err(SkeinError::UnknownNode(_))));
    }

    #[test]
    fn test_leaf_dag() {
        let dag = LeafNodeDag::new("child", vec!["branch".to_string()]);
        assert!(dag.start_node().is_none());
        assert_eq!(dag.to_node("child").unwrap(), vec!["branch".to_string()]);
        assert!(dag.to_node("other").is_err());
        assert!(dag.from_node("child").unwrap().is_empty());
        assert!(dag.from_node("anything").unwrap().is_empty());
    }
}
