use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use skein_core::config::EngineConfig;
use skein_core::error::{Result as SkeinResult, SkeinError};
use skein_core::event::EventBus;
use skein_core::lineage::ExecutionContext;
use skein_core::node::WorkflowSpec;
use skein_core::traits::{ExecutionClosure, LaunchContext, LaunchPlanExecutor};
use skein_core::types::{Identifier, LiteralMap, WorkflowExecutionIdentifier};

use skein_engine::{EngineMetrics, NodeExecutor, PluginRegistry, WorkflowExecutor, WorkflowPhase};
use skein_storage::{InMemoryCatalog, InMemoryDataStore, InMemoryStatusStore};

#[derive(Parser)]
#[command(name = "skein", version, about = "Re-entrant workflow node execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "skein.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow locally until it finishes or the pass limit is reached
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Workflow inputs (JSON literal map)
        #[arg(long)]
        inputs: Option<PathBuf>,
        /// Execution name (generated if not provided)
        #[arg(long)]
        execution: Option<String>,
        /// Maximum number of reconciliation passes
        #[arg(long, default_value = "100")]
        max_passes: u32,
    },
    /// Check a workflow definition for structural errors
    Validate {
        /// Workflow definition (JSON)
        workflow: PathBuf,
    },
    /// Show current configuration
    Config,
}

/// Launch backend for local runs, where no remote control plane exists.
struct LocalLaunchBackend;

impl LaunchPlanExecutor for LocalLaunchBackend {
    fn launch(
        &self,
        _ctx: LaunchContext,
        execution_id: WorkflowExecutionIdentifier,
        launch_plan: Identifier,
        _inputs: LiteralMap,
    ) -> BoxFuture<'_, SkeinResult<()>> {
        Box::pin(async move {
            Err(SkeinError::LaunchRejected(format!(
                "launch plan {} cannot run locally (execution {})",
                launch_plan, execution_id
            )))
        })
    }

    fn get_status(
        &self,
        execution_id: &WorkflowExecutionIdentifier,
    ) -> BoxFuture<'_, SkeinResult<Option<ExecutionClosure>>> {
        let name = execution_id.name.clone();
        Box::pin(async move { Err(SkeinError::ExecutionNotFound(name)) })
    }

    fn kill(
        &self,
        _execution_id: &WorkflowExecutionIdentifier,
        _reason: &str,
    ) -> BoxFuture<'_, SkeinResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skein=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { workflow } => {
            let spec = read_workflow(&workflow)?;
            println!(
                "Workflow '{}' is valid ({} nodes)",
                spec.id,
                spec.nodes().count()
            );
        }
        Commands::Run {
            workflow,
            inputs,
            execution,
            max_passes,
        } => {
            let spec = Arc::new(read_workflow(&workflow)?);
            let inputs = match inputs {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading inputs {}", path.display()))?;
                    serde_json::from_str::<LiteralMap>(&text)
                        .with_context(|| format!("parsing inputs {}", path.display()))?
                }
                None => LiteralMap::new(),
            };
            let name = execution.unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("x{}", &id[..12])
            });
            run_workflow(config, spec, inputs, name, max_passes).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    match EngineConfig::load(path) {
        Ok(config) => Ok(config),
        Err(SkeinError::ConfigNotFound(_)) if path == Path::new("skein.toml") => {
            debug!("No skein.toml found, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn read_workflow(path: &Path) -> anyhow::Result<WorkflowSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid workflow {}", path.display()))
}

async fn run_workflow(
    config: EngineConfig,
    spec: Arc<WorkflowSpec>,
    inputs: LiteralMap,
    name: String,
    max_passes: u32,
) -> anyhow::Result<()> {
    let events = Arc::new(EventBus::new(config.events.capacity));
    let metrics = Arc::new(EngineMetrics::new("skein"));

    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            debug!(
                node_id = %event.node_id,
                unique_id = %event.unique_id,
                phase = %event.phase,
                attempt = event.attempt,
                "Node event"
            );
        }
    });

    let executor = NodeExecutor::builder(Arc::new(InMemoryDataStore::new()), config)
        .with_plugins(Arc::new(PluginRegistry::with_builtins()))
        .with_catalog(Arc::new(InMemoryCatalog::new()))
        .with_launch_plans(Arc::new(LocalLaunchBackend))
        .with_events(events)
        .with_metrics(metrics.clone())
        .build();
    executor.setup().await?;

    let runner = WorkflowExecutor::new(Arc::new(executor));
    let ctx = ExecutionContext::new(WorkflowExecutionIdentifier::new("local", "development", name));
    let statuses = Arc::new(InMemoryStatusStore::new());

    runner.seed_inputs(&ctx, &spec, &inputs).await?;
    info!(execution = %ctx.execution_id, workflow = %spec.id, "Starting workflow");

    let mut phase = WorkflowPhase::Running;
    let mut passes = 0;
    while passes < max_passes && !phase.is_terminal() {
        passes += 1;
        phase = runner
            .execute_pass(&ctx, spec.clone(), statuses.clone())
            .await?;
        debug!(pass = passes, phase = ?phase, "Pass finished");
    }

    println!("Execution: {}", ctx.execution_id);
    println!("Passes:    {}", passes);
    println!("Metrics:   {}", serde_json::to_string(&metrics.snapshot())?);

    match phase {
        WorkflowPhase::Succeeded => {
            let outputs = runner
                .workflow_outputs(&spec, statuses.clone())
                .await?
                .unwrap_or_default();
            println!("Phase:     succeeded");
            println!("{}", serde_json::to_string_pretty(&outputs)?);
            Ok(())
        }
        WorkflowPhase::Failed(err) => {
            println!("Phase:     failed");
            bail!("workflow failed: {}", err)
        }
        WorkflowPhase::Running => {
            warn!(passes, "Pass limit reached, aborting");
            runner
                .abort(&ctx, spec, statuses, "pass limit reached")
                .await?;
            bail!("workflow did not finish within {} passes", max_passes)
        }
    }
}
