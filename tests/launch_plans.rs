mod common;

use std::sync::Arc;

use common::Harness;
use skein_core::error::{codes, ErrorKind, ExecutionError};
use skein_core::node::{BindingData, Node, WorkflowSpec};
use skein_core::status::{Phase, WorkflowNodePhase};
use skein_core::traits::{ExecutionClosure, WorkflowExecutionPhase};
use skein_core::types::{Identifier, END_NODE_ID, START_NODE_ID};
use skein_engine::WorkflowPhase;
use skein_test_utils::{
    int_inputs, test_context, LaunchResponse, MockLaunchPlanExecutor, StatusResponse,
};

/// `start -> lp -> end`, where `lp` launches `child-lp`.
fn launch_plan_workflow() -> Arc<WorkflowSpec> {
    let nodes = vec![
        Node::start(),
        Node::launch_plan("lp", Identifier::launch_plan("child-lp", "1"))
            .after(&[START_NODE_ID])
            .with_input("x", BindingData::promise(START_NODE_ID, "x")),
        Node::end()
            .after(&["lp"])
            .with_input("x", BindingData::promise("lp", "x")),
    ];
    Arc::new(WorkflowSpec::new("parent", nodes).unwrap())
}

async fn harness(backend: &Arc<MockLaunchPlanExecutor>) -> Harness {
    Harness::builder().launch_plans(backend.clone()).build().await
}

#[tokio::test]
async fn test_launch_then_poll_until_success() {
    let backend = Arc::new(
        MockLaunchPlanExecutor::new()
            .on_status(StatusResponse::phase(WorkflowExecutionPhase::Running))
            .on_status(StatusResponse::succeeded_with(int_inputs(&[("x", 42)]))),
    );
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Running);
    let launches = backend.launches();
    assert_eq!(launches.len(), 1);
    let launch = &launches[0];
    assert_eq!(launch.execution_id.name, "exec1-lp-0");
    assert_eq!(launch.execution_id.project, "proj");
    assert_eq!(launch.launch_plan.name, "child-lp");
    assert_eq!(launch.inputs, int_inputs(&[("x", 1)]));
    assert_eq!(launch.ctx.principal, "unknown");
    assert_eq!(launch.ctx.nesting_level, 0);
    assert_eq!(launch.ctx.parent_node_execution.node_id, "lp");

    let lp = h.status("lp").workflow.unwrap();
    assert_eq!(lp.phase, WorkflowNodePhase::ExecutionStarted);
    assert_eq!(lp.launched_execution.unwrap().name, "exec1-lp-0");

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Running);
    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);
    assert_eq!(backend.launches().len(), 1);
    assert_eq!(backend.status_calls().len(), 2);
    assert_eq!(h.outputs(&wf).await, Some(int_inputs(&[("x", 42)])));
}

#[tokio::test]
async fn test_existing_execution_is_adopted() {
    let backend = Arc::new(MockLaunchPlanExecutor::new().on_launch(LaunchResponse::AlreadyExists));
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Running);

    let lp = h.status("lp");
    assert_eq!(lp.phase, Phase::Running);
    assert_eq!(lp.workflow.unwrap().phase, WorkflowNodePhase::ExecutionStarted);
}

#[tokio::test]
async fn test_missing_status_is_indeterminate() {
    let backend = Arc::new(
        MockLaunchPlanExecutor::new()
            .on_status(StatusResponse::Missing)
            .on_status(StatusResponse::Missing)
            .on_status(StatusResponse::succeeded_with(int_inputs(&[("x", 9)]))),
    );
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    h.pass(&ctx, &wf).await;
    h.pass(&ctx, &wf).await;
    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Running);

    let lp = h.status("lp");
    assert_eq!(lp.phase, Phase::Running);
    assert_eq!(lp.workflow.unwrap().consecutive_unknown_polls, 2);
    assert_eq!(h.metrics.snapshot().indeterminate_polls, 2);

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);
    assert_eq!(h.status("lp").workflow.unwrap().consecutive_unknown_polls, 0);
}

#[tokio::test]
async fn test_rejected_launch_is_user_failure() {
    let backend = Arc::new(
        MockLaunchPlanExecutor::new().on_launch(LaunchResponse::Rejected("bad inputs".into())),
    );
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let phase = h.pass(&ctx, &wf).await;

    let WorkflowPhase::Failed(err) = phase else {
        panic!("expected failure, got {:?}", phase);
    };
    assert_eq!(err.kind, ErrorKind::User);
    assert!(err.message.contains("bad inputs"));
    assert_eq!(h.status(END_NODE_ID).phase, Phase::NotYetStarted);
}

#[tokio::test]
async fn test_backend_outage_keeps_node_resumable() {
    let backend = Arc::new(
        MockLaunchPlanExecutor::new()
            .on_launch(LaunchResponse::Unavailable("connection refused".into()))
            .on_launch(LaunchResponse::Accepted),
    );
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let result = h
        .runner
        .execute_pass(&ctx, wf.clone(), h.statuses.clone())
        .await;
    assert!(result.is_err());
    assert_eq!(h.status("lp").phase, Phase::Queued);

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Running);
    let launches = backend.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].execution_id, launches[1].execution_id);
}

#[tokio::test]
async fn test_child_failure_carries_remote_error() {
    let remote = ExecutionError::user("ValueError", "division by zero");
    let backend = Arc::new(MockLaunchPlanExecutor::new().on_status(StatusResponse::Closure(
        ExecutionClosure {
            phase: WorkflowExecutionPhase::Failed,
            outputs: None,
            error: Some(remote.clone()),
        },
    )));
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let phase = h.run(&ctx, &wf, 3).await;

    assert_eq!(phase, WorkflowPhase::Failed(remote));
}

#[tokio::test]
async fn test_child_failure_without_error_is_unknown() {
    let backend = Arc::new(
        MockLaunchPlanExecutor::new().on_status(StatusResponse::phase(WorkflowExecutionPhase::Failed)),
    );
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let WorkflowPhase::Failed(err) = h.run(&ctx, &wf, 3).await else {
        panic!("expected failure");
    };
    assert_eq!(err.kind, ErrorKind::Unknown);
    assert_eq!(err.code, codes::LAUNCH_PLAN_EXECUTION_FAILED);
}

#[tokio::test]
async fn test_aborted_child_is_system_failure() {
    let backend = Arc::new(
        MockLaunchPlanExecutor::new()
            .on_status(StatusResponse::phase(WorkflowExecutionPhase::Aborted)),
    );
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let WorkflowPhase::Failed(err) = h.run(&ctx, &wf, 3).await else {
        panic!("expected failure");
    };
    assert_eq!(err.kind, ErrorKind::System);
    assert_eq!(err.code, codes::REMOTE_CHILD_WORKFLOW_EXECUTION_FAILED);
}

#[tokio::test]
async fn test_unknown_child_execution_fails_node() {
    let backend = Arc::new(MockLaunchPlanExecutor::new().on_status(StatusResponse::NotFound));
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let WorkflowPhase::Failed(err) = h.run(&ctx, &wf, 3).await else {
        panic!("expected failure");
    };
    assert_eq!(err.kind, ErrorKind::System);
    assert_eq!(err.code, codes::RUNTIME_EXECUTION_ERROR);
}

#[tokio::test]
async fn test_abort_kills_launched_execution() {
    let backend = Arc::new(MockLaunchPlanExecutor::new());
    let h = harness(&backend).await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;
    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Running);

    h.runner
        .abort(&ctx, wf.clone(), h.statuses.clone(), "user requested")
        .await
        .unwrap();

    let kills = backend.kills();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].0.name, "exec1-lp-0");
    assert_eq!(
        kills[0].1,
        "cascading abort as parent execution id [exec1] aborted, reason [user requested]"
    );
    assert_eq!(h.status("lp").phase, Phase::Aborted);
}

#[tokio::test]
async fn test_launch_plan_without_backend_is_an_error() {
    let h = Harness::builder().build().await;
    let ctx = test_context("exec1");
    let wf = launch_plan_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 1)])).await;

    let result = h
        .runner
        .execute_pass(&ctx, wf.clone(), h.statuses.clone())
        .await;

    assert!(result.is_err());
}
