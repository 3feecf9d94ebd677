use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use skein_core::error::{Result, SkeinError};
use skein_core::traits::{PluginResolver, PluginTransition, TaskExecutionContext, TaskPlugin};
use skein_core::types::OUTPUTS_FILE;
use skein_storage::RemoteFileOutputReader;

/// Task plugins keyed by task type.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn TaskPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own id.
    pub fn register(&mut self, plugin: impl TaskPlugin) {
        let plugin: Arc<dyn TaskPlugin> = Arc::new(plugin);
        self.plugins.insert(plugin.id().to_string(), plugin);
    }

    /// Register a shared plugin under an additional task type.
    pub fn register_for(&mut self, task_type: impl Into<String>, plugin: Arc<dyn TaskPlugin>) {
        self.plugins.insert(task_type.into(), plugin);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskPlugin>> {
        self.plugins.get(task_type).cloned()
    }

    /// Registered task types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Create a registry with the built-in plugins registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(EchoPlugin);
        registry
    }
}

impl PluginResolver for PluginRegistry {
    fn resolve_plugin(&self, task_type: &str) -> Result<Arc<dyn TaskPlugin>> {
        self.get(task_type)
            .ok_or_else(|| SkeinError::UnsupportedTaskType(task_type.to_string()))
    }

    fn plugins(&self) -> Vec<Arc<dyn TaskPlugin>> {
        let mut seen: Vec<Arc<dyn TaskPlugin>> = Vec::new();
        for plugin in self.plugins.values() {
            if !seen.iter().any(|p| Arc::ptr_eq(p, plugin)) {
                seen.push(plugin.clone());
            }
        }
        seen
    }
}

/// Publishes its inputs unchanged as outputs. Completes in one step.
pub struct EchoPlugin;

impl TaskPlugin for EchoPlugin {
    fn id(&self) -> &str {
        "echo"
    }

    fn handle(&self, ctx: TaskExecutionContext) -> BoxFuture<'_, Result<PluginTransition>> {
        Box::pin(async move {
            let inputs = ctx.input_reader.get().await?;
            debug!(node_id = %ctx.node_id, count = inputs.len(), "Echoing inputs");
            ctx.data_store
                .write_literals(&ctx.output_dir.join(OUTPUTS_FILE), &inputs)
                .await?;
            Ok(PluginTransition::Success {
                state: serde_json::Value::Null,
                outputs: Some(Arc::new(RemoteFileOutputReader::new(
                    ctx.data_store.clone(),
                    &ctx.output_dir,
                ))),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::node::TaskTemplate;
    use skein_core::traits::{DataStore, InputReader, OutputReader};
    use skein_core::types::{DataReference, Identifier, Literal, LiteralMap, WorkflowExecutionIdentifier, INPUTS_FILE};
    use skein_storage::{InMemoryDataStore, RemoteFileInputReader};

    #[test]
    fn test_unknown_task_type() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.resolve_plugin("echo").is_ok());
        assert!(matches!(
            registry.resolve_plugin("spark"),
            Err(SkeinError::UnsupportedTaskType(t)) if t == "spark"
        ));
    }

    #[test]
    fn test_shared_plugin_listed_once() {
        let mut registry = PluginRegistry::with_builtins();
        let echo = registry.get("echo").unwrap();
        registry.register_for("python-task", echo);
        assert_eq!(registry.list(), vec!["echo", "python-task"]);
        assert_eq!(registry.plugins().len(), 1);
    }

    #[tokio::test]
    async fn test_echo_plugin_copies_inputs() {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        let data_dir = DataReference::new("mem://test/exec/n1");
        let output_dir = data_dir.join("0");

        let mut inputs = LiteralMap::new();
        inputs.insert("x".into(), Literal::integer(7));
        store.write_literals(&data_dir.join(INPUTS_FILE), &inputs).await.unwrap();

        let input_reader: Arc<dyn InputReader> =
            Arc::new(RemoteFileInputReader::new(store.clone(), &data_dir));
        let ctx = TaskExecutionContext {
            node_id: "n1".into(),
            unique_id: "n1".into(),
            attempt: 0,
            execution_id: WorkflowExecutionIdentifier::new("p", "d", "exec"),
            template: TaskTemplate::new(Identifier::task("echo", "v1"), "echo"),
            input_reader,
            output_dir: output_dir.clone(),
            data_store: store.clone(),
            plugin_state: serde_json::Value::Null,
            plugin_state_version: 0,
        };

        let transition = EchoPlugin.handle(ctx).await.unwrap();
        let reader = match transition {
            PluginTransition::Success { outputs: Some(reader), .. } => reader,
            other => panic!("unexpected transition {:?}", other),
        };
        assert!(reader.is_file());
        assert_eq!(reader.read().await.unwrap(), inputs);
    }
}
