//! Workflow nodes: launch plans executed by a remote backend, and sub-workflows
//! driven inline by the same executor.
//!
//! Both keep a [`WorkflowNodeState`](skein_core::status::WorkflowNodeState) whose
//! phase selects between starting the child and checking on it.

mod inline;
mod launchplan;

use skein_core::error::Result;
use skein_core::lineage::{
    fixed_length_unique_id_for_parts, generate_unique_id, EventVersion, ExecutionContext,
    MAX_UNIQUE_ID_LENGTH,
};
use skein_core::types::{NodeExecutionIdentifier, WorkflowExecutionIdentifier};

pub use inline::SubWorkflowHandler;
pub use launchplan::LaunchPlanHandler;

/// Node-execution id reported as the parent of a launched child. Uses the
/// lineage unique id, or the local node id under [`EventVersion::V0`].
pub fn parent_node_execution_id(
    ctx: &ExecutionContext,
    node_id: &str,
) -> Result<NodeExecutionIdentifier> {
    let node_id = match ctx.event_version {
        EventVersion::V0 => node_id.to_string(),
        _ => generate_unique_id(ctx.parent_info.as_ref(), node_id)?,
    };
    Ok(NodeExecutionIdentifier {
        execution_id: ctx.execution_id.clone(),
        node_id,
    })
}

/// Deterministic id of the execution launched for one attempt of a node.
pub fn child_execution_id(
    parent: &NodeExecutionIdentifier,
    attempt: u32,
) -> Result<WorkflowExecutionIdentifier> {
    let attempt = attempt.to_string();
    let name = fixed_length_unique_id_for_parts(
        MAX_UNIQUE_ID_LENGTH,
        &[
            parent.execution_id.name.as_str(),
            parent.node_id.as_str(),
            attempt.as_str(),
        ],
    )?;
    Ok(WorkflowExecutionIdentifier::new(
        parent.execution_id.project.clone(),
        parent.execution_id.domain.clone(),
        name,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::lineage::ParentInfo;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(WorkflowExecutionIdentifier::new("proj", "dev", "exec"))
            .with_parent_info(ParentInfo::new("b1", 0))
    }

    #[test]
    fn test_parent_id_uses_local_id_for_v0() {
        let parent = parent_node_execution_id(&ctx(), "lp").unwrap();
        assert_eq!(parent.node_id, "lp");
        assert_eq!(parent.execution_id.name, "exec");
    }

    #[test]
    fn test_parent_id_uses_lineage_for_v1() {
        let ctx = ctx().with_event_version(EventVersion::V1);
        let parent = parent_node_execution_id(&ctx, "lp").unwrap();
        assert_eq!(parent.node_id, "b1-0-lp");
    }

    #[test]
    fn test_child_execution_id() {
        let parent = parent_node_execution_id(&ctx(), "lp").unwrap();
        let child = child_execution_id(&parent, 1).unwrap();
        assert_eq!(child, WorkflowExecutionIdentifier::new("proj", "dev", "exec-lp-1"));

        // Attempts never share a child execution.
        assert_ne!(child_execution_id(&parent, 2).unwrap(), child);
    }

    #[test]
    fn test_child_execution_id_is_bounded() {
        let parent = NodeExecutionIdentifier {
            execution_id: WorkflowExecutionIdentifier::new("p", "d", "a-rather-long-execution-name"),
            node_id: "node".into(),
        };
        let child = child_execution_id(&parent, 0).unwrap();
        assert!(child.name.len() <= MAX_UNIQUE_ID_LENGTH);
        assert!(child.name.starts_with('f'));
        assert_eq!(child, child_execution_id(&parent, 0).unwrap());
    }
}
