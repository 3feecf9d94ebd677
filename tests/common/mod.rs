#![allow(dead_code)]

use std::sync::Arc;

use skein_core::config::EngineConfig;
use skein_core::event::{EventBus, NodeEvent};
use skein_core::lineage::ExecutionContext;
use skein_core::node::WorkflowSpec;
use skein_core::status::NodeStatus;
use skein_core::traits::{CatalogClient, LaunchPlanExecutor, NodeStatusStore, TaskPlugin};
use skein_core::types::LiteralMap;
use skein_engine::{EngineMetrics, NodeExecutor, PluginRegistry, WorkflowExecutor, WorkflowPhase};
use skein_storage::{InMemoryDataStore, InMemoryStatusStore};
use tokio::sync::broadcast::Receiver;

/// One executor wired to in-memory storage, plus handles to inspect it.
pub struct Harness {
    pub store: Arc<InMemoryDataStore>,
    pub statuses: Arc<InMemoryStatusStore>,
    pub metrics: Arc<EngineMetrics>,
    pub events: Arc<EventBus>,
    pub runner: WorkflowExecutor,
}

#[derive(Default)]
pub struct HarnessBuilder {
    config: EngineConfig,
    plugins: Vec<(String, Arc<dyn TaskPlugin>)>,
    catalog: Option<Arc<dyn CatalogClient>>,
    launch_plans: Option<Arc<dyn LaunchPlanExecutor>>,
    store: Option<Arc<InMemoryDataStore>>,
}

impl HarnessBuilder {
    pub fn plugin(mut self, task_type: &str, plugin: Arc<dyn TaskPlugin>) -> Self {
        self.plugins.push((task_type.to_string(), plugin));
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CatalogClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn launch_plans(mut self, launch_plans: Arc<dyn LaunchPlanExecutor>) -> Self {
        self.launch_plans = Some(launch_plans);
        self
    }

    /// Share a data store with another harness.
    pub fn store(mut self, store: Arc<InMemoryDataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Harness {
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryDataStore::new()));
        let metrics = Arc::new(EngineMetrics::new("test"));
        let events = Arc::new(EventBus::new(1024));

        let mut registry = PluginRegistry::with_builtins();
        for (task_type, plugin) in self.plugins {
            registry.register_for(task_type, plugin);
        }

        let mut builder = NodeExecutor::builder(store.clone(), self.config)
            .with_plugins(Arc::new(registry))
            .with_events(events.clone())
            .with_metrics(metrics.clone());
        if let Some(catalog) = self.catalog {
            builder = builder.with_catalog(catalog);
        }
        if let Some(launch_plans) = self.launch_plans {
            builder = builder.with_launch_plans(launch_plans);
        }
        let executor = builder.build();
        executor.setup().await.unwrap();

        Harness {
            store,
            statuses: Arc::new(InMemoryStatusStore::new()),
            metrics,
            events,
            runner: WorkflowExecutor::new(Arc::new(executor)),
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub async fn seed(&self, ctx: &ExecutionContext, workflow: &WorkflowSpec, inputs: LiteralMap) {
        self.runner.seed_inputs(ctx, workflow, &inputs).await.unwrap();
    }

    pub async fn pass(&self, ctx: &ExecutionContext, workflow: &Arc<WorkflowSpec>) -> WorkflowPhase {
        self.runner
            .execute_pass(ctx, workflow.clone(), self.statuses.clone())
            .await
            .unwrap()
    }

    /// Run passes until the workflow is terminal, at most `max` times.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        workflow: &Arc<WorkflowSpec>,
        max: usize,
    ) -> WorkflowPhase {
        let mut phase = WorkflowPhase::Running;
        for _ in 0..max {
            phase = self.pass(ctx, workflow).await;
            if phase.is_terminal() {
                break;
            }
        }
        phase
    }

    pub fn status(&self, key: &str) -> NodeStatus {
        self.statuses.node_status(key).unwrap_or_default()
    }

    pub fn set_status(&self, key: &str, status: NodeStatus) {
        self.statuses.set_node_status(key, status);
    }

    pub async fn outputs(&self, workflow: &WorkflowSpec) -> Option<LiteralMap> {
        self.runner
            .workflow_outputs(workflow, self.statuses.clone())
            .await
            .unwrap()
    }

    pub fn subscribe(&self) -> Receiver<NodeEvent> {
        self.events.subscribe()
    }
}

/// Drain every event published so far.
pub fn drain(rx: &mut Receiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
