use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, SkeinError};
use crate::types::{
    Identifier, Literal, NodeId, Primitive, Resources, TypedInterface, END_NODE_ID, START_NODE_ID,
};

/// Static definition of a node. Immutable once the workflow is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    /// How each input variable is produced.
    #[serde(default)]
    pub inputs: Vec<Binding>,
    /// Nodes that must finish before this one may start.
    #[serde(default)]
    pub upstream: Vec<NodeId>,
    #[serde(default)]
    pub resources: Option<Resources>,
    /// Extra attempts allowed after a recoverable failure. Unset falls back
    /// to the engine default; `Some(0)` disables retries.
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub active_deadline_secs: Option<u64>,
    pub target: NodeTarget,
}

/// What a node runs. Adding a node type means adding a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeTarget {
    Start,
    End,
    Task { template: TaskTemplate },
    Branch { branch: BranchNodeSpec },
    SubWorkflow { workflow: Box<WorkflowSpec> },
    LaunchPlan { launch_plan: Identifier },
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Task,
    Branch,
    SubWorkflow,
    LaunchPlan,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Task => "task",
            NodeKind::Branch => "branch",
            NodeKind::SubWorkflow => "sub_workflow",
            NodeKind::LaunchPlan => "launch_plan",
        };
        f.write_str(s)
    }
}

impl Node {
    fn with_target(id: impl Into<String>, target: NodeTarget) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            inputs: vec![],
            upstream: vec![],
            resources: None,
            retries: None,
            active_deadline_secs: None,
            target,
        }
    }

    pub fn start() -> Self {
        Self::with_target(START_NODE_ID, NodeTarget::Start)
    }

    pub fn end() -> Self {
        Self::with_target(END_NODE_ID, NodeTarget::End)
    }

    pub fn task(id: impl Into<String>, template: TaskTemplate) -> Self {
        Self::with_target(id, NodeTarget::Task { template })
    }

    pub fn branch(id: impl Into<String>, branch: BranchNodeSpec) -> Self {
        Self::with_target(id, NodeTarget::Branch { branch })
    }

    pub fn sub_workflow(id: impl Into<String>, workflow: WorkflowSpec) -> Self {
        Self::with_target(
            id,
            NodeTarget::SubWorkflow {
                workflow: Box::new(workflow),
            },
        )
    }

    pub fn launch_plan(id: impl Into<String>, launch_plan: Identifier) -> Self {
        Self::with_target(id, NodeTarget::LaunchPlan { launch_plan })
    }

    /// Set the upstream nodes.
    pub fn after(mut self, upstream: &[&str]) -> Self {
        self.upstream = upstream.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Bind an input variable.
    pub fn with_input(mut self, var: impl Into<String>, binding: BindingData) -> Self {
        self.inputs.push(Binding {
            var: var.into(),
            binding,
        });
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_deadline_secs(mut self, secs: u64) -> Self {
        self.active_deadline_secs = Some(secs);
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn kind(&self) -> NodeKind {
        match &self.target {
            NodeTarget::Start => NodeKind::Start,
            NodeTarget::End => NodeKind::End,
            NodeTarget::Task { .. } => NodeKind::Task,
            NodeTarget::Branch { .. } => NodeKind::Branch,
            NodeTarget::SubWorkflow { .. } => NodeKind::SubWorkflow,
            NodeTarget::LaunchPlan { .. } => NodeKind::LaunchPlan,
        }
    }

    pub fn task_template(&self) -> Option<&TaskTemplate> {
        match &self.target {
            NodeTarget::Task { template } => Some(template),
            _ => None,
        }
    }

    pub fn branch_spec(&self) -> Option<&BranchNodeSpec> {
        match &self.target {
            NodeTarget::Branch { branch } => Some(branch),
            _ => None,
        }
    }

    pub fn sub_workflow_spec(&self) -> Option<&WorkflowSpec> {
        match &self.target {
            NodeTarget::SubWorkflow { workflow } => Some(workflow),
            _ => None,
        }
    }

    pub fn launch_plan_ref(&self) -> Option<&Identifier> {
        match &self.target {
            NodeTarget::LaunchPlan { launch_plan } => Some(launch_plan),
            _ => None,
        }
    }
}

/// Binds one input variable of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub var: String,
    pub binding: BindingData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingData {
    /// A constant value.
    Scalar(Literal),
    /// An output variable of another node.
    Promise { node_id: NodeId, var: String },
}

impl BindingData {
    pub fn promise(node_id: impl Into<String>, var: impl Into<String>) -> Self {
        BindingData::Promise {
            node_id: node_id.into(),
            var: var.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: Identifier,
    /// Selects the plugin that executes this task.
    pub task_type: String,
    #[serde(default)]
    pub interface: TypedInterface,
    #[serde(default)]
    pub metadata: TaskMetadata,
    /// Plugin-specific configuration.
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl TaskTemplate {
    pub fn new(id: Identifier, task_type: impl Into<String>) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            interface: TypedInterface::default(),
            metadata: TaskMetadata::default(),
            custom: serde_json::Value::Null,
        }
    }

    pub fn with_interface(mut self, interface: TypedInterface) -> Self {
        self.interface = interface;
        self
    }

    /// Make the task memoizable under the given cache version.
    pub fn discoverable(mut self, version: impl Into<String>) -> Self {
        self.metadata.discoverable = true;
        self.metadata.discovery_version = version.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub discoverable: bool,
    #[serde(default)]
    pub discovery_version: String,
}

/// Conditional node: selects exactly one downstream node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNodeSpec {
    #[serde(rename = "if")]
    pub if_block: IfBlock,
    #[serde(default)]
    pub else_if: Vec<IfBlock>,
    #[serde(default)]
    pub else_node: Option<NodeId>,
    /// Fail with this error when nothing matches and there is no else node.
    #[serde(default)]
    pub else_fail: Option<ExecutionError>,
}

impl BranchNodeSpec {
    pub fn new(condition: BooleanExpression, then_node: impl Into<String>) -> Self {
        Self {
            if_block: IfBlock {
                condition,
                then_node: then_node.into(),
            },
            else_if: vec![],
            else_node: None,
            else_fail: None,
        }
    }

    pub fn or_if(mut self, condition: BooleanExpression, then_node: impl Into<String>) -> Self {
        self.else_if.push(IfBlock {
            condition,
            then_node: then_node.into(),
        });
        self
    }

    pub fn otherwise(mut self, else_node: impl Into<String>) -> Self {
        self.else_node = Some(else_node.into());
        self
    }

    /// Every node this branch may select, in evaluation order.
    pub fn candidates(&self) -> Vec<&NodeId> {
        let mut out = vec![&self.if_block.then_node];
        out.extend(self.else_if.iter().map(|b| &b.then_node));
        if let Some(e) = &self.else_node {
            out.push(e);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlock {
    pub condition: BooleanExpression,
    pub then_node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanExpression {
    Comparison {
        op: ComparisonOp,
        left: Operand,
        right: Operand,
    },
    Conjunction {
        op: ConjunctionOp,
        left: Box<BooleanExpression>,
        right: Box<BooleanExpression>,
    },
}

impl BooleanExpression {
    pub fn compare(op: ComparisonOp, left: Operand, right: Operand) -> Self {
        BooleanExpression::Comparison { op, left, right }
    }

    pub fn and(left: BooleanExpression, right: BooleanExpression) -> Self {
        BooleanExpression::Conjunction {
            op: ConjunctionOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: BooleanExpression, right: BooleanExpression) -> Self {
        BooleanExpression::Conjunction {
            op: ConjunctionOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Primitive(Primitive),
    /// Name of a bound input of the branch node.
    Var(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConjunctionOp {
    And,
    Or,
}

/// A validated workflow: nodes plus derived upstream/downstream adjacency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDefinition", into = "WorkflowDefinition")]
pub struct WorkflowSpec {
    pub id: String,
    nodes: BTreeMap<NodeId, Arc<Node>>,
    upstream: BTreeMap<NodeId, Vec<NodeId>>,
    downstream: BTreeMap<NodeId, Vec<NodeId>>,
    start_node: NodeId,
}

/// Serialized form of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub nodes: Vec<Node>,
}

impl TryFrom<WorkflowDefinition> for WorkflowSpec {
    type Error = SkeinError;

    fn try_from(def: WorkflowDefinition) -> Result<Self, Self::Error> {
        WorkflowSpec::new(def.id, def.nodes)
    }
}

impl From<WorkflowSpec> for WorkflowDefinition {
    fn from(spec: WorkflowSpec) -> Self {
        WorkflowDefinition {
            id: spec.id,
            nodes: spec.nodes.values().map(|n| n.as_ref().clone()).collect(),
        }
    }
}

impl WorkflowSpec {
    /// Build and validate a workflow from its nodes.
    pub fn new(id: impl Into<String>, nodes: Vec<Node>) -> crate::error::Result<Self> {
        let id = id.into();
        let invalid = |message: String| SkeinError::InvalidWorkflow {
            workflow: id.clone(),
            message,
        };

        let mut node_map: BTreeMap<NodeId, Arc<Node>> = BTreeMap::new();
        for node in nodes {
            if node_map.contains_key(&node.id) {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
            node_map.insert(node.id.clone(), Arc::new(node));
        }

        match node_map.get(START_NODE_ID) {
            Some(n) if n.kind() == NodeKind::Start => {}
            Some(_) => return Err(invalid(format!("'{}' must be a start node", START_NODE_ID))),
            None => return Err(invalid("missing start node".to_string())),
        }

        let mut upstream: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        let mut downstream: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in node_map.values() {
            upstream.entry(node.id.clone()).or_default();
            downstream.entry(node.id.clone()).or_default();
        }

        for node in node_map.values() {
            for up in &node.upstream {
                if !node_map.contains_key(up) {
                    return Err(invalid(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.id, up
                    )));
                }
                if let Some(list) = upstream.get_mut(&node.id) {
                    list.push(up.clone());
                }
                if let Some(list) = downstream.get_mut(up) {
                    list.push(node.id.clone());
                }
            }
            if let Some(branch) = node.branch_spec() {
                for candidate in branch.candidates() {
                    if !node_map.contains_key(candidate) {
                        return Err(invalid(format!(
                            "branch '{}' selects unknown node '{}'",
                            node.id, candidate
                        )));
                    }
                }
            }
        }

        let spec = Self {
            id,
            nodes: node_map,
            upstream,
            downstream,
            start_node: START_NODE_ID.to_string(),
        };
        spec.check_acyclic()?;
        Ok(spec)
    }

    fn check_acyclic(&self) -> crate::error::Result<()> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .upstream
            .iter()
            .map(|(id, ups)| (id.as_str(), ups.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(id) = queue.pop_front() {
            visited.insert(id);
            for down in self.downstream.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(down.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(down.as_str());
                    }
                }
            }
        }

        if visited.len() != self.nodes.len() {
            return Err(SkeinError::InvalidWorkflow {
                workflow: self.id.clone(),
                message: "cycle detected between nodes".to_string(),
            });
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).cloned()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node
    }

    pub fn upstream_of(&self, id: &str) -> Option<&[NodeId]> {
        self.upstream.get(id).map(|v| v.as_slice())
    }

    pub fn downstream_of(&self, id: &str) -> Option<&[NodeId]> {
        self.downstream.get(id).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(id: &str) -> Node {
        Node::task(id, TaskTemplate::new(Identifier::task(id, "1"), "echo"))
    }

    #[test]
    fn test_adjacency_is_derived_from_upstream() {
        let spec = WorkflowSpec::new(
            "wf",
            vec![
                Node::start(),
                echo("a").after(&[START_NODE_ID]),
                echo("b").after(&["a"]),
                Node::end().after(&["a", "b"]),
            ],
        )
        .unwrap();

        assert_eq!(spec.upstream_of("b").unwrap(), ["a".to_string()]);
        assert_eq!(
            spec.downstream_of("a").unwrap(),
            ["b".to_string(), END_NODE_ID.to_string()]
        );
        assert!(spec.downstream_of(END_NODE_ID).unwrap().is_empty());
    }

    #[test]
    fn test_missing_start_node() {
        let err = WorkflowSpec::new("wf", vec![echo("a")]).unwrap_err();
        assert!(matches!(err, SkeinError::InvalidWorkflow { .. }));
    }

    #[test]
    fn test_unknown_upstream() {
        let err = WorkflowSpec::new("wf", vec![Node::start(), echo("a").after(&["ghost"])])
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = WorkflowSpec::new(
            "wf",
            vec![
                Node::start(),
                echo("a").after(&[START_NODE_ID, "b"]),
                echo("b").after(&["a"]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_branch_candidates_must_exist() {
        let cond = BooleanExpression::compare(
            ComparisonOp::Eq,
            Operand::Primitive(Primitive::Integer(1)),
            Operand::Primitive(Primitive::Integer(1)),
        );
        let err = WorkflowSpec::new(
            "wf",
            vec![
                Node::start(),
                Node::branch("b", BranchNodeSpec::new(cond, "missing")).after(&[START_NODE_ID]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_workflow_json_roundtrip_rebuilds_adjacency() {
        let json = r#"{
            "id": "wf",
            "nodes": [
                {"id": "start-node", "target": {"type": "start"}},
                {"id": "a", "upstream": ["start-node"], "target": {"type": "task", "template": {
                    "id": {"name": "a"}, "task_type": "echo"}}}
            ]
        }"#;
        let spec: WorkflowSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.downstream_of(START_NODE_ID).unwrap(), ["a".to_string()]);
        assert_eq!(spec.node("a").unwrap().kind(), NodeKind::Task);
    }
}
