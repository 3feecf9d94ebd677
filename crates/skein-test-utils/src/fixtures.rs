use std::path::PathBuf;

use tempfile::TempDir;

use skein_core::lineage::ExecutionContext;
use skein_core::node::{
    BindingData, BooleanExpression, BranchNodeSpec, ComparisonOp, Node, Operand, TaskTemplate,
    WorkflowSpec,
};
use skein_core::types::{
    Identifier, Literal, LiteralMap, LiteralType, Primitive, TypedInterface,
    WorkflowExecutionIdentifier, END_NODE_ID, START_NODE_ID,
};

/// Root execution context in project `proj`, domain `dev`.
pub fn test_context(name: &str) -> ExecutionContext {
    ExecutionContext::new(WorkflowExecutionIdentifier::new("proj", "dev", name))
}

/// Task taking and producing an integer `x`.
pub fn echo_template(name: &str, task_type: &str) -> TaskTemplate {
    let mut interface = TypedInterface::default();
    interface.inputs.insert("x".into(), LiteralType::Integer);
    interface.outputs.insert("x".into(), LiteralType::Integer);
    TaskTemplate::new(Identifier::task(name, "1"), task_type).with_interface(interface)
}

pub fn int_inputs(values: &[(&str, i64)]) -> LiteralMap {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), Literal::integer(*v)))
        .collect()
}

/// `start -> t1 -> end`, with `x` flowing through.
pub fn single_task_workflow(template: TaskTemplate) -> WorkflowSpec {
    let nodes = vec![
        Node::start(),
        Node::task("t1", template)
            .after(&[START_NODE_ID])
            .with_input("x", BindingData::promise(START_NODE_ID, "x")),
        Node::end()
            .after(&["t1"])
            .with_input("x", BindingData::promise("t1", "x")),
    ];
    WorkflowSpec::new("single-task", nodes).unwrap()
}

/// `start -> b1 -> end`. `b1` runs `n1` when `lhs == rhs`, `n2` otherwise.
pub fn branch_workflow(lhs: f64, rhs: f64, template: TaskTemplate) -> WorkflowSpec {
    let condition = BooleanExpression::compare(
        ComparisonOp::Eq,
        Operand::Primitive(Primitive::Float(lhs)),
        Operand::Primitive(Primitive::Float(rhs)),
    );
    let nodes = vec![
        Node::start(),
        Node::branch("b1", BranchNodeSpec::new(condition, "n1").otherwise("n2"))
            .after(&[START_NODE_ID]),
        Node::task("n1", template.clone())
            .with_input("x", BindingData::promise(START_NODE_ID, "x")),
        Node::task("n2", template).with_input("x", BindingData::promise(START_NODE_ID, "x")),
        Node::end()
            .after(&["b1"])
            .with_input("x", BindingData::promise("b1", "x")),
    ];
    WorkflowSpec::new("branching", nodes).unwrap()
}

/// Write `contents` to `skein.toml` in a fresh temp dir. Keep the dir alive
/// for as long as the path is used.
pub fn temp_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("skein.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
