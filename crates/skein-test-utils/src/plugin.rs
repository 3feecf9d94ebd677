use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use skein_core::error::{ExecutionError, Result, SkeinError};
use skein_core::traits::{
    PluginProperties, PluginTransition, TaskExecutionContext, TaskPlugin,
};
use skein_core::types::{LiteralMap, OUTPUTS_FILE};
use skein_storage::{InMemoryOutputReader, RemoteFileOutputReader};

/// One scripted plugin response.
#[derive(Debug, Clone)]
pub enum Step {
    Queued,
    Running,
    /// Write the inputs to `{output_dir}/outputs` and succeed.
    Echo,
    /// Succeed with in-memory outputs the handler must commit.
    SucceedWith(LiteralMap),
    /// Succeed without an output reader.
    SucceedWithoutOutputs,
    Retryable(ExecutionError),
    Permanent(ExecutionError),
    /// Fail the call itself.
    Error(String),
}

/// Task plugin that replays a script, then echoes once the script runs out.
pub struct ScriptedPlugin {
    id: String,
    script: Mutex<VecDeque<Step>>,
    properties: PluginProperties,
    calls: AtomicUsize,
    setups: AtomicUsize,
    attempts: Mutex<Vec<u32>>,
    states: Mutex<Vec<u32>>,
    aborts: Mutex<Vec<String>>,
}

impl ScriptedPlugin {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self::build(id.into(), steps, PluginProperties::default()))
    }

    /// Plugin that manages its own caching.
    pub fn self_caching(id: impl Into<String>, steps: Vec<Step>) -> Arc<Self> {
        let properties = PluginProperties {
            disable_node_level_caching: true,
        };
        Arc::new(Self::build(id.into(), steps, properties))
    }

    fn build(id: String, steps: Vec<Step>, properties: PluginProperties) -> Self {
        Self {
            id,
            script: Mutex::new(steps.into()),
            properties,
            calls: AtomicUsize::new(0),
            setups: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    /// Attempt number seen by each call.
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }

    /// Plugin state version seen by each call.
    pub fn state_versions(&self) -> Vec<u32> {
        self.states.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().unwrap().clone()
    }
}

impl TaskPlugin for ScriptedPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn properties(&self) -> PluginProperties {
        self.properties
    }

    fn setup(&self) -> BoxFuture<'_, Result<()>> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn handle(&self, ctx: TaskExecutionContext) -> BoxFuture<'_, Result<PluginTransition>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(ctx.attempt);
        self.states.lock().unwrap().push(ctx.plugin_state_version);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Echo);
        let plugin = self.id.clone();

        Box::pin(async move {
            let state = serde_json::json!({ "step": format!("{:?}", step) });
            match step {
                Step::Queued => Ok(PluginTransition::Queued { state }),
                Step::Running => Ok(PluginTransition::Running { state }),
                Step::Echo => {
                    let inputs = ctx.input_reader.get().await?;
                    ctx.data_store
                        .write_literals(&ctx.output_dir.join(OUTPUTS_FILE), &inputs)
                        .await?;
                    Ok(PluginTransition::Success {
                        state,
                        outputs: Some(Arc::new(RemoteFileOutputReader::new(
                            ctx.data_store.clone(),
                            &ctx.output_dir,
                        ))),
                    })
                }
                Step::SucceedWith(outputs) => Ok(PluginTransition::Success {
                    state,
                    outputs: Some(Arc::new(InMemoryOutputReader::new(outputs))),
                }),
                Step::SucceedWithoutOutputs => Ok(PluginTransition::Success {
                    state,
                    outputs: None,
                }),
                Step::Retryable(err) => Ok(PluginTransition::RetryableFailure(err)),
                Step::Permanent(err) => Ok(PluginTransition::PermanentFailure(err)),
                Step::Error(message) => Err(SkeinError::Plugin { plugin, message }),
            }
        })
    }

    fn abort(&self, _ctx: TaskExecutionContext, reason: &str) -> BoxFuture<'_, Result<()>> {
        self.aborts.lock().unwrap().push(reason.to_string());
        Box::pin(async { Ok(()) })
    }
}
