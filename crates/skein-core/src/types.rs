use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Local id of a node within its (sub-)workflow.
pub type NodeId = String;

/// Start node id reserved in every workflow.
pub const START_NODE_ID: &str = "start-node";
/// End node id reserved in every workflow.
pub const END_NODE_ID: &str = "end-node";

/// Identity of a task or launch plan.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default)]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Identifier {
    pub fn task(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            resource_type: ResourceType::Task,
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn launch_plan(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            resource_type: ResourceType::LaunchPlan,
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}@{}",
            self.resource_type, self.project, self.domain, self.name, self.version
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Task,
    Workflow,
    LaunchPlan,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::Task => "task",
            ResourceType::Workflow => "workflow",
            ResourceType::LaunchPlan => "launch_plan",
        };
        f.write_str(s)
    }
}

/// Identity of one workflow execution.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionIdentifier {
    pub project: String,
    pub domain: String,
    pub name: String,
}

impl WorkflowExecutionIdentifier {
    pub fn new(
        project: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            domain: domain.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for WorkflowExecutionIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.domain, self.name)
    }
}

/// Identity of one node execution inside a workflow execution.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecutionIdentifier {
    pub execution_id: WorkflowExecutionIdentifier,
    pub node_id: NodeId,
}

/// Location of a blob in the data store.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataReference(pub String);

impl DataReference {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Append a path segment.
    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        let base = self.0.trim_end_matches('/');
        let seg = segment.as_ref().trim_start_matches('/');
        if base.is_empty() {
            return Self(seg.to_string());
        }
        Self(format!("{}/{}", base, seg))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for DataReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataReference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// File names inside a node's data directories.
pub const INPUTS_FILE: &str = "inputs";
pub const OUTPUTS_FILE: &str = "outputs";
pub const ERROR_FILE: &str = "error";

/// A scalar value that conditions can compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

/// A typed value flowing along workflow edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Scalar(Primitive),
    Collection(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
}

impl Literal {
    pub fn integer(v: i64) -> Self {
        Literal::Scalar(Primitive::Integer(v))
    }

    pub fn float(v: f64) -> Self {
        Literal::Scalar(Primitive::Float(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Literal::Scalar(Primitive::String(v.into()))
    }

    pub fn boolean(v: bool) -> Self {
        Literal::Scalar(Primitive::Boolean(v))
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Literal::Scalar(p) => Some(p),
            _ => None,
        }
    }
}

/// Named values, e.g. the inputs or outputs of a node.
pub type LiteralMap = BTreeMap<String, Literal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralType {
    Integer,
    Float,
    String,
    Boolean,
    Collection,
    Map,
}

/// Declared inputs and outputs of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedInterface {
    #[serde(default)]
    pub inputs: BTreeMap<String, LiteralType>,
    #[serde(default)]
    pub outputs: BTreeMap<String, LiteralType>,
}

impl TypedInterface {
    pub fn outputs_declared(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Resource requests attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub gpu: Option<String>,
}
