//! Task nodes: hand work to the plugin registered for the task type, wrapped
//! in the catalog gate.

pub mod catalog;
pub mod gate;
pub mod plugin;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use skein_core::error::{Result, SkeinError};
use skein_core::node::TaskTemplate;
use skein_core::status::{CatalogCacheStatus, PluginPhase, TaskNodeState};
use skein_core::traits::{
    CatalogMetadata, PluginResolver, PluginTransition, TaskExecutionContext,
};

use crate::handler::{NodeExecutionContext, NodeHandler, Transition};

pub use catalog::NoopCatalog;
pub use gate::{CacheLookup, CatalogGate, OutputValidation};
pub use plugin::{EchoPlugin, PluginRegistry};

pub struct TaskHandler {
    plugins: Arc<dyn PluginResolver>,
    gate: CatalogGate,
}

impl TaskHandler {
    pub fn new(plugins: Arc<dyn PluginResolver>, gate: CatalogGate) -> Self {
        Self { plugins, gate }
    }

    async fn run_plugin(
        &self,
        nctx: &NodeExecutionContext<'_>,
        template: &TaskTemplate,
        mut state: TaskNodeState,
    ) -> Result<Transition> {
        let plugin = self.plugins.resolve_plugin(&template.task_type)?;
        let tctx = task_context(nctx, template, &state);

        let transition = plugin.handle(tctx).await?;
        debug!(node_id = %nctx.node_id(), plugin = plugin.id(), transition = ?transition, "Plugin returned");

        match transition {
            PluginTransition::Queued { state: plugin_state } => {
                state.plugin_phase = PluginPhase::Queued;
                store_plugin_state(&mut state, plugin_state);
                Ok(Transition::running()
                    .with_message("task queued")
                    .with_task_state(state))
            }
            PluginTransition::Running { state: plugin_state } => {
                state.plugin_phase = PluginPhase::Running;
                store_plugin_state(&mut state, plugin_state);
                Ok(Transition::running()
                    .with_message("task running")
                    .with_task_state(state))
            }
            PluginTransition::Success {
                state: plugin_state,
                outputs,
            } => {
                store_plugin_state(&mut state, plugin_state);
                let metadata = CatalogMetadata {
                    execution_id: nctx.exec_ctx.execution_id.clone(),
                    node_id: nctx.unique_id.clone(),
                    attempt: nctx.attempt(),
                };
                let validation = self
                    .gate
                    .validate_output_and_cache_add(
                        template,
                        plugin.properties(),
                        nctx.input_reader.clone(),
                        outputs,
                        nctx.output_writer.as_ref(),
                        metadata,
                    )
                    .await?;

                if let Some(cache_status) = validation.cache_status {
                    state.cache_status = Some(cache_status);
                }
                if let Some(err) = validation.error {
                    return Ok(Transition::failure(err).with_task_state(state));
                }
                state.plugin_phase = PluginPhase::Succeeded;
                Ok(Transition::success().with_task_state(state))
            }
            PluginTransition::RetryableFailure(err) => {
                Ok(Transition::failure(err.recoverable()).with_task_state(state))
            }
            PluginTransition::PermanentFailure(err) => {
                Ok(Transition::failure(err).with_task_state(state))
            }
        }
    }
}

impl NodeHandler for TaskHandler {
    fn setup(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for plugin in self.plugins.plugins() {
                debug!(plugin = plugin.id(), "Setting up task plugin");
                plugin.setup().await?;
            }
            Ok(())
        })
    }

    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>) -> BoxFuture<'a, Result<Transition>> {
        Box::pin(async move {
            let template = task_template(nctx)?;
            let mut state = nctx.status.task.clone().unwrap_or_default();

            if state.plugin_phase == PluginPhase::NotStarted {
                let lookup = self
                    .gate
                    .check_catalog_cache(
                        template,
                        nctx.input_reader.clone(),
                        nctx.output_writer.as_ref(),
                    )
                    .await?;
                match lookup {
                    CacheLookup::Hit => {
                        info!(node_id = %nctx.node_id(), "Task outputs served from catalog");
                        state.plugin_phase = PluginPhase::Succeeded;
                        state.cache_status = Some(CatalogCacheStatus::Hit);
                        return Ok(Transition::success()
                            .with_message("outputs served from catalog")
                            .with_task_state(state));
                    }
                    CacheLookup::Miss(cache_status) => state.cache_status = Some(cache_status),
                }
            }

            self.run_plugin(nctx, template, state).await
        })
    }

    fn abort<'a>(
        &'a self,
        nctx: &'a NodeExecutionContext<'a>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let template = task_template(nctx)?;
            let plugin = self.plugins.resolve_plugin(&template.task_type)?;
            let state = nctx.status.task.clone().unwrap_or_default();
            plugin
                .abort(task_context(nctx, template, &state), reason)
                .await
        })
    }
}

fn task_template<'a>(nctx: &'a NodeExecutionContext<'_>) -> Result<&'a TaskTemplate> {
    nctx.node
        .task_template()
        .ok_or_else(|| SkeinError::InvalidNode {
            node: nctx.node_id().to_string(),
            message: "not a task node".to_string(),
        })
}

fn task_context(
    nctx: &NodeExecutionContext<'_>,
    template: &TaskTemplate,
    state: &TaskNodeState,
) -> TaskExecutionContext {
    TaskExecutionContext {
        node_id: nctx.node_id().to_string(),
        unique_id: nctx.unique_id.clone(),
        attempt: nctx.attempt(),
        execution_id: nctx.exec_ctx.execution_id.clone(),
        template: template.clone(),
        input_reader: nctx.input_reader.clone(),
        output_dir: nctx.output_dir().clone(),
        data_store: nctx.data_store.clone(),
        plugin_state: state.plugin_state.clone(),
        plugin_state_version: state.plugin_state_version,
    }
}

fn store_plugin_state(state: &mut TaskNodeState, plugin_state: serde_json::Value) {
    state.plugin_state = plugin_state;
    state.plugin_state_version += 1;
}
