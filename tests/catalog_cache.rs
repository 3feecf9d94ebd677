mod common;

use std::sync::Arc;

use common::Harness;
use skein_core::config::EngineConfig;
use skein_core::node::WorkflowSpec;
use skein_core::status::{CatalogCacheStatus, Phase};
use skein_engine::WorkflowPhase;
use skein_test_utils::{
    echo_template, int_inputs, single_task_workflow, test_context, MockCatalog, ScriptedPlugin,
};

fn cached_workflow() -> Arc<WorkflowSpec> {
    let template = echo_template("cached", "scripted").discoverable("1.0");
    Arc::new(single_task_workflow(template))
}

#[tokio::test]
async fn test_second_execution_is_served_from_catalog() {
    let catalog = Arc::new(MockCatalog::new());
    let plugin = ScriptedPlugin::new("scripted", vec![]);
    let wf = cached_workflow();

    let first = Harness::builder()
        .plugin("scripted", plugin.clone())
        .catalog(catalog.clone())
        .build()
        .await;
    let ctx = test_context("first");
    first.seed(&ctx, &wf, int_inputs(&[("x", 7)])).await;
    assert_eq!(first.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);
    assert_eq!(plugin.calls(), 1);
    assert_eq!(catalog.put_calls(), 1);
    assert_eq!(catalog.len(), 1);
    assert_eq!(first.metrics.snapshot().catalog_misses, 1);
    assert_eq!(first.metrics.snapshot().catalog_put_successes, 1);

    let second = Harness::builder()
        .plugin("scripted", plugin.clone())
        .catalog(catalog.clone())
        .build()
        .await;
    let ctx = test_context("second");
    second.seed(&ctx, &wf, int_inputs(&[("x", 7)])).await;
    assert_eq!(second.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);

    assert_eq!(plugin.calls(), 1);
    let t1 = second.status("t1");
    assert_eq!(t1.phase, Phase::Succeeded);
    assert_eq!(t1.task.unwrap().cache_status, Some(CatalogCacheStatus::Hit));
    assert_eq!(second.metrics.snapshot().catalog_hits, 1);
    assert_eq!(second.outputs(&wf).await, Some(int_inputs(&[("x", 7)])));
}

#[tokio::test]
async fn test_different_inputs_miss_the_catalog() {
    let catalog = Arc::new(MockCatalog::new());
    let plugin = ScriptedPlugin::new("scripted", vec![]);
    let wf = cached_workflow();
    let h = Harness::builder()
        .plugin("scripted", plugin.clone())
        .catalog(catalog.clone())
        .build()
        .await;

    for (name, x) in [("first", 1), ("second", 2)] {
        let ctx = test_context(name);
        h.seed(&ctx, &wf, int_inputs(&[("x", x)])).await;
        let statuses = skein_storage::InMemoryStatusStore::new();
        let phase = h
            .runner
            .execute_pass(&ctx, wf.clone(), Arc::new(statuses))
            .await
            .unwrap();
        assert_eq!(phase, WorkflowPhase::Succeeded);
    }

    assert_eq!(plugin.calls(), 2);
    assert_eq!(catalog.len(), 2);
    assert_eq!(h.metrics.snapshot().catalog_hits, 0);
    assert_eq!(h.metrics.snapshot().catalog_misses, 2);
}

#[tokio::test]
async fn test_catalog_lookup_failure_runs_task() {
    let catalog = Arc::new(MockCatalog::new().failing_gets());
    let plugin = ScriptedPlugin::new("scripted", vec![]);
    let h = Harness::builder()
        .plugin("scripted", plugin.clone())
        .catalog(catalog.clone())
        .build()
        .await;
    let ctx = test_context("exec1");
    let wf = cached_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 3)])).await;

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);
    assert_eq!(plugin.calls(), 1);
    assert_eq!(catalog.get_calls(), 1);
    assert_eq!(h.metrics.snapshot().catalog_get_failures, 1);
}

#[tokio::test]
async fn test_catalog_write_failure_does_not_fail_task() {
    let catalog = Arc::new(MockCatalog::new().failing_puts());
    let plugin = ScriptedPlugin::new("scripted", vec![]);
    let h = Harness::builder()
        .plugin("scripted", plugin)
        .catalog(catalog.clone())
        .build()
        .await;
    let ctx = test_context("exec1");
    let wf = cached_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 3)])).await;

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);
    assert_eq!(catalog.put_calls(), 1);
    assert!(catalog.is_empty());
    assert_eq!(h.metrics.snapshot().catalog_put_failures, 1);
    assert_eq!(
        h.status("t1").task.unwrap().cache_status,
        Some(CatalogCacheStatus::PutFailure)
    );
}

#[tokio::test]
async fn test_disabled_catalog_is_never_consulted() {
    let catalog = Arc::new(MockCatalog::new());
    let plugin = ScriptedPlugin::new("scripted", vec![]);
    let mut config = EngineConfig::default();
    config.catalog.enabled = false;
    let h = Harness::builder()
        .plugin("scripted", plugin.clone())
        .catalog(catalog.clone())
        .config(config)
        .build()
        .await;
    let ctx = test_context("exec1");
    let wf = cached_workflow();
    h.seed(&ctx, &wf, int_inputs(&[("x", 3)])).await;

    assert_eq!(h.pass(&ctx, &wf).await, WorkflowPhase::Succeeded);
    assert_eq!(plugin.calls(), 1);
    assert_eq!(catalog.get_calls(), 0);
    assert_eq!(catalog.put_calls(), 0);
}
