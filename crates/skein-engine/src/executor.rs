use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use skein_core::config::EngineConfig;
use skein_core::error::{codes, ExecutionError, Result, SkeinError};
use skein_core::event::{EventBus, NodeEvent};
use skein_core::lineage::{create_parent_info, generate_unique_id, ExecutionContext};
use skein_core::node::{BindingData, Node, NodeKind};
use skein_core::status::{NodeStatus, Phase};
use skein_core::traits::{CatalogClient, DataStore, LaunchPlanExecutor, PluginResolver};
use skein_core::types::{DataReference, LiteralMap, NodeId, INPUTS_FILE, OUTPUTS_FILE};
use skein_storage::{RemoteFileInputReader, RemoteFileOutputWriter};

use crate::branch::BranchHandler;
use crate::dag::DagStructure;
use crate::handler::{
    HandlerPhase, HandlerRegistry, NodeExecutionContext, NodeHandler, NodeOutcome,
    RecursiveNodeExecutor, Transition,
};
use crate::lookup::NodeLookup;
use crate::metrics::EngineMetrics;
use crate::structural::{EndHandler, StartHandler};
use crate::subworkflow::{LaunchPlanHandler, SubWorkflowHandler};
use crate::task::{CatalogGate, NoopCatalog, PluginRegistry, TaskHandler};

enum Readiness {
    Ready,
    Pending,
    UpstreamFailed(NodeId),
}

enum Prepared {
    Queued(NodeStatus),
    Failed(ExecutionError),
}

/// Outcomes of the nodes already driven in one traversal. A join is reached
/// once per predecessor but handled once.
#[derive(Default)]
struct Visited {
    outcomes: Mutex<HashMap<NodeId, NodeOutcome>>,
}

impl Visited {
    fn get(&self, id: &str) -> Option<NodeOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn insert(&self, id: NodeId, outcome: NodeOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, outcome);
    }
}

/// Drives node occurrences through their phases, one reconciliation pass at a time.
///
/// Each call resumes from the persisted status of the node, invokes the handler
/// for its kind when the node is ready, records the resulting transition and
/// recurses into successors once the node has finished.
pub struct NodeExecutor {
    handlers: HandlerRegistry,
    data_store: Arc<dyn DataStore>,
    data_root: DataReference,
    max_error_message_length: usize,
    default_max_retries: u32,
    events: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
}

impl NodeExecutor {
    pub fn new(
        handlers: HandlerRegistry,
        data_store: Arc<dyn DataStore>,
        config: &EngineConfig,
        events: Arc<EventBus>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            handlers,
            data_store,
            data_root: config.storage.data_root(),
            max_error_message_length: config.engine.max_error_message_length,
            default_max_retries: config.engine.default_max_retries,
            events,
            metrics,
        }
    }

    /// Start building an executor with the standard handlers.
    pub fn builder(data_store: Arc<dyn DataStore>, config: EngineConfig) -> NodeExecutorBuilder {
        NodeExecutorBuilder {
            data_store,
            config,
            plugins: None,
            catalog: None,
            launch_plans: None,
            events: None,
            metrics: None,
        }
    }

    /// Run every handler's setup.
    pub async fn setup(&self) -> Result<()> {
        self.handlers.setup_all().await
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn data_store(&self) -> &Arc<dyn DataStore> {
        &self.data_store
    }

    fn handle_node<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        dag: &'a dyn DagStructure,
        lookup: &'a dyn NodeLookup,
        visited: &'a Visited,
        node: Arc<Node>,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            if let Some(outcome) = visited.get(&node.id) {
                return Ok(outcome);
            }
            let id = node.id.clone();
            let outcome = self.drive_node(ctx, dag, lookup, visited, node).await?;
            // A join still waiting on a predecessor is checked again from the next one.
            if outcome != NodeOutcome::Pending {
                visited.insert(id, outcome.clone());
            }
            Ok(outcome)
        })
    }

    async fn drive_node(
        &self,
        ctx: &ExecutionContext,
        dag: &dyn DagStructure,
        lookup: &dyn NodeLookup,
        visited: &Visited,
        node: Arc<Node>,
    ) -> Result<NodeOutcome> {
        let status = lookup.get_node_execution_status(&node.id);
        let unique_id = generate_unique_id(ctx.parent_info.as_ref(), &node.id)?;

        let phase = status.phase;
        let status = match phase {
            Phase::Succeeded | Phase::Skipped => {
                return self.handle_downstream(ctx, dag, lookup, visited, &node).await;
            }
            Phase::Failed => {
                let err = status.error.unwrap_or_else(ExecutionError::unknown);
                return Ok(NodeOutcome::Failed(err));
            }
            Phase::Aborted => {
                let err = status
                    .error
                    .unwrap_or_else(|| ExecutionError::user(codes::ABORTED, status.message));
                return Ok(NodeOutcome::Failed(err));
            }
            Phase::NotYetStarted => match self.check_readiness(dag, lookup, &node)? {
                Readiness::Pending => {
                    debug!(node_id = %node.id, "Node waiting on upstream");
                    return Ok(NodeOutcome::Pending);
                }
                Readiness::UpstreamFailed(upstream) => {
                    let mut status = status;
                    let message = format!("upstream node '{}' did not succeed", upstream);
                    status.error = Some(ExecutionError::user(codes::UPSTREAM_FAILED, &message));
                    self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Skipped, message);
                    return self.handle_downstream(ctx, dag, lookup, visited, &node).await;
                }
                Readiness::Ready => {
                    match self.prepare_node(ctx, lookup, &node, &unique_id, status).await? {
                        Prepared::Queued(status) => status,
                        Prepared::Failed(err) => return Ok(NodeOutcome::Failed(err)),
                    }
                }
            },
            Phase::Queued | Phase::Running => status,
        };

        self.execute_node(ctx, dag, lookup, visited, node, unique_id, status)
            .await
    }

    /// Every predecessor must have succeeded or been skipped. A branch that
    /// selected this node also counts as satisfied.
    fn check_readiness(
        &self,
        dag: &dyn DagStructure,
        lookup: &dyn NodeLookup,
        node: &Node,
    ) -> Result<Readiness> {
        let mut ready = true;
        for upstream in dag.to_node(&node.id)? {
            let status = lookup.get_node_execution_status(&upstream);
            if blocks_downstream(&status) {
                return Ok(Readiness::UpstreamFailed(upstream));
            }
            if status.phase.is_success_like() {
                continue;
            }
            let selected_by_branch = status
                .branch
                .as_ref()
                .and_then(|b| b.finalized_node_id.as_deref())
                == Some(node.id.as_str());
            if !selected_by_branch {
                ready = false;
            }
        }
        Ok(if ready { Readiness::Ready } else { Readiness::Pending })
    }

    async fn prepare_node(
        &self,
        ctx: &ExecutionContext,
        lookup: &dyn NodeLookup,
        node: &Node,
        unique_id: &str,
        mut status: NodeStatus,
    ) -> Result<Prepared> {
        let data_dir = self.data_dir_for(ctx, unique_id);
        status.output_dir = data_dir.join(status.attempts.to_string());
        status.data_dir = data_dir;

        match self.resolve_bindings(lookup, node).await? {
            Ok(inputs) => {
                // Start nodes have no bindings; their inputs are seeded by the caller.
                if !node.inputs.is_empty() {
                    self.data_store
                        .write_literals(&status.data_dir.join(INPUTS_FILE), &inputs)
                        .await?;
                }
            }
            Err(err) => {
                status.error = Some(err.clone());
                let message = err.message.clone();
                self.record(ctx, lookup, node, unique_id, &mut status, Phase::Failed, message);
                return Ok(Prepared::Failed(err));
            }
        }

        status.started_at = Some(Utc::now());
        self.record(ctx, lookup, node, unique_id, &mut status, Phase::Queued, "");
        Ok(Prepared::Queued(status))
    }

    /// Resolve input bindings. A missing upstream output is a user error.
    async fn resolve_bindings(
        &self,
        lookup: &dyn NodeLookup,
        node: &Node,
    ) -> Result<std::result::Result<LiteralMap, ExecutionError>> {
        let mut inputs = LiteralMap::new();
        for binding in &node.inputs {
            let value = match &binding.binding {
                BindingData::Scalar(literal) => literal.clone(),
                BindingData::Promise { node_id, var } => {
                    let upstream = lookup.get_node_execution_status(node_id);
                    let path = upstream.output_dir.join(OUTPUTS_FILE);
                    let outputs = match self.data_store.read_literals(&path).await {
                        Ok(outputs) => outputs,
                        Err(e) if e.is_not_found() => {
                            return Ok(Err(binding_error(&binding.var, node_id, var)));
                        }
                        Err(e) => return Err(e),
                    };
                    match outputs.get(var) {
                        Some(value) => value.clone(),
                        None => return Ok(Err(binding_error(&binding.var, node_id, var))),
                    }
                }
            };
            inputs.insert(binding.var.clone(), value);
        }
        Ok(Ok(inputs))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_node(
        &self,
        ctx: &ExecutionContext,
        dag: &dyn DagStructure,
        lookup: &dyn NodeLookup,
        visited: &Visited,
        node: Arc<Node>,
        unique_id: String,
        status: NodeStatus,
    ) -> Result<NodeOutcome> {
        let handler = self.handlers.get(node.kind())?;

        if let Some(err) = deadline_exceeded(&node, &status) {
            warn!(node_id = %node.id, "Node exceeded its active deadline");
            let nctx = self.build_context(ctx, lookup, &node, &unique_id, status.clone());
            self.abort_best_effort(handler.as_ref(), &nctx, &err.message).await;
            let mut status = status;
            status.error = Some(err.clone());
            let message = err.message.clone();
            self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Failed, message);
            return Ok(NodeOutcome::Failed(err));
        }

        let transition = {
            let nctx = self.build_context(ctx, lookup, &node, &unique_id, status.clone());
            handler.handle(&nctx).await?
        };

        self.apply_transition(ctx, dag, lookup, visited, node, unique_id, status, transition)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_transition(
        &self,
        ctx: &ExecutionContext,
        dag: &dyn DagStructure,
        lookup: &dyn NodeLookup,
        visited: &Visited,
        node: Arc<Node>,
        unique_id: String,
        mut status: NodeStatus,
        transition: Transition,
    ) -> Result<NodeOutcome> {
        if let Some(branch) = transition.branch {
            status.branch = Some(branch);
        }
        if let Some(task) = transition.task {
            status.task = Some(task);
        }
        if let Some(workflow) = transition.workflow {
            status.workflow = Some(workflow);
        }
        if let Some(data_dir) = transition.data_dir {
            status.data_dir = data_dir;
        }
        if let Some(output_dir) = transition.output_dir {
            status.output_dir = output_dir;
        }
        if !transition.skipped.is_empty() {
            self.skip_candidates(ctx, lookup, &node, status.attempts, &transition.skipped)?;
        }

        let message = transition.message;
        match transition.phase {
            HandlerPhase::Running => {
                self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Running, message);
                Ok(NodeOutcome::Running)
            }
            HandlerPhase::Indeterminate => {
                warn!(node_id = %node.id, message = %message, "Node progress is indeterminate");
                self.metrics.record_indeterminate_poll();
                self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Running, message);
                Ok(NodeOutcome::Running)
            }
            HandlerPhase::Success => {
                self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Succeeded, message);
                self.handle_downstream(ctx, dag, lookup, visited, &node).await
            }
            HandlerPhase::Skip => {
                self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Skipped, message);
                self.handle_downstream(ctx, dag, lookup, visited, &node).await
            }
            HandlerPhase::Failed(err) => {
                let err = err.trimmed(self.max_error_message_length);
                let max_retries = node.retries.unwrap_or(self.default_max_retries);

                if err.recoverable && status.attempts + 1 <= max_retries {
                    status.attempts += 1;
                    status.clear_handler_state();
                    status.output_dir = status.data_dir.join(status.attempts.to_string());
                    self.metrics.record_retry();
                    info!(
                        node_id = %node.id,
                        attempt = status.attempts,
                        error = %err,
                        "Retrying node after recoverable failure"
                    );
                    let message = format!("retrying after {}", err);
                    self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Queued, message);
                    return Ok(NodeOutcome::Queued);
                }

                status.error = Some(err.clone());
                let message = err.message.clone();
                self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Failed, message);
                Ok(NodeOutcome::Failed(err))
            }
        }
    }

    /// Recurse into successors in order. The first failure stops activation of
    /// the remaining siblings.
    async fn handle_downstream(
        &self,
        ctx: &ExecutionContext,
        dag: &dyn DagStructure,
        lookup: &dyn NodeLookup,
        visited: &Visited,
        node: &Node,
    ) -> Result<NodeOutcome> {
        let mut all_complete = true;
        for id in dag.from_node(&node.id)? {
            let child = lookup
                .get_node(&id)
                .ok_or_else(|| SkeinError::UnknownNode(id.clone()))?;
            match self.handle_node(ctx, dag, lookup, visited, child).await? {
                NodeOutcome::Failed(err) => return Ok(NodeOutcome::Failed(err)),
                NodeOutcome::Complete => {}
                _ => all_complete = false,
            }
        }
        Ok(if all_complete {
            NodeOutcome::Complete
        } else {
            NodeOutcome::Running
        })
    }

    /// Record the candidates a branch did not take as skipped. They live under
    /// the branch occurrence in the lineage.
    fn skip_candidates(
        &self,
        ctx: &ExecutionContext,
        lookup: &dyn NodeLookup,
        branch: &Node,
        attempt: u32,
        candidates: &[NodeId],
    ) -> Result<()> {
        let parent_info = create_parent_info(ctx.parent_info.as_ref(), &branch.id, attempt)?;
        let child_ctx = ctx.with_parent_info(parent_info);
        for id in candidates {
            let candidate = lookup
                .get_node(id)
                .ok_or_else(|| SkeinError::UnknownNode(id.clone()))?;
            let mut status = lookup.get_node_execution_status(id);
            if status.phase != Phase::NotYetStarted {
                continue;
            }
            let unique_id = generate_unique_id(child_ctx.parent_info.as_ref(), id)?;
            self.record(
                &child_ctx,
                lookup,
                &candidate,
                &unique_id,
                &mut status,
                Phase::Skipped,
                "branch not taken",
            );
        }
        Ok(())
    }

    fn abort_node<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        dag: &'a dyn DagStructure,
        lookup: &'a dyn NodeLookup,
        node: Arc<Node>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut status = lookup.get_node_execution_status(&node.id);
            match status.phase {
                Phase::Succeeded | Phase::Skipped => {
                    for id in dag.from_node(&node.id)? {
                        let child = lookup
                            .get_node(&id)
                            .ok_or_else(|| SkeinError::UnknownNode(id.clone()))?;
                        self.abort_node(ctx, dag, lookup, child, reason).await?;
                    }
                    Ok(())
                }
                Phase::Queued | Phase::Running => {
                    let unique_id = generate_unique_id(ctx.parent_info.as_ref(), &node.id)?;
                    let handler = self.handlers.get(node.kind())?;
                    let nctx = self.build_context(ctx, lookup, &node, &unique_id, status.clone());
                    self.abort_best_effort(handler.as_ref(), &nctx, reason).await;

                    info!(node_id = %node.id, reason = %reason, "Aborting node");
                    status.error = Some(ExecutionError::user(codes::ABORTED, reason));
                    self.record(ctx, lookup, &node, &unique_id, &mut status, Phase::Aborted, reason);
                    Ok(())
                }
                _ => Ok(()),
            }
        })
    }

    async fn abort_best_effort(
        &self,
        handler: &dyn NodeHandler,
        nctx: &NodeExecutionContext<'_>,
        reason: &str,
    ) {
        if let Err(e) = handler.abort(nctx, reason).await {
            warn!(node_id = %nctx.node.id, error = %e, "Abort failed, continuing");
            self.metrics.record_abort_failure();
        }
    }

    fn build_context<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        lookup: &'a dyn NodeLookup,
        node: &Arc<Node>,
        unique_id: &str,
        status: NodeStatus,
    ) -> NodeExecutionContext<'a> {
        NodeExecutionContext {
            node: node.clone(),
            input_reader: Arc::new(RemoteFileInputReader::new(
                self.data_store.clone(),
                &status.data_dir,
            )),
            output_writer: Arc::new(RemoteFileOutputWriter::new(
                self.data_store.clone(),
                &status.output_dir,
            )),
            status,
            exec_ctx: ctx,
            unique_id: unique_id.to_string(),
            lookup,
            executor: self,
            data_store: self.data_store.clone(),
        }
    }

    fn data_dir_for(&self, ctx: &ExecutionContext, unique_id: &str) -> DataReference {
        self.data_root
            .join(&ctx.execution_id.name)
            .join(unique_id)
    }

    /// Persist `status` in `phase`. Phase changes are logged and published.
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &ExecutionContext,
        lookup: &dyn NodeLookup,
        node: &Node,
        unique_id: &str,
        status: &mut NodeStatus,
        phase: Phase,
        message: impl Into<String>,
    ) {
        let changed = status.phase != phase;
        status.update_phase(phase, message);
        lookup.update_node_execution_status(&node.id, status.clone());

        if !changed {
            return;
        }
        info!(
            node_id = %node.id,
            unique_id = %unique_id,
            kind = %node.kind(),
            phase = %phase,
            "Node phase changed"
        );
        self.events.publish(NodeEvent {
            execution_id: ctx.execution_id.clone(),
            node_id: node.id.clone(),
            unique_id: unique_id.to_string(),
            phase,
            attempt: status.attempts,
            occurred_at: Utc::now(),
            error: status.error.clone(),
        });
    }
}

impl RecursiveNodeExecutor for NodeExecutor {
    fn recursive_node_handler<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        dag: &'a dyn DagStructure,
        lookup: &'a dyn NodeLookup,
        node: Arc<Node>,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let visited = Visited::default();
            self.handle_node(ctx, dag, lookup, &visited, node).await
        })
    }

    fn abort_handler<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        dag: &'a dyn DagStructure,
        lookup: &'a dyn NodeLookup,
        node: Arc<Node>,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.abort_node(ctx, dag, lookup, node, reason)
    }

    fn node_data_dir(&self, ctx: &ExecutionContext, node_id: &str) -> Result<DataReference> {
        let unique_id = generate_unique_id(ctx.parent_info.as_ref(), node_id)?;
        Ok(self.data_dir_for(ctx, &unique_id))
    }
}

/// Failed or aborted, or skipped because its own upstream failed.
fn blocks_downstream(status: &NodeStatus) -> bool {
    status.phase.is_failure_like() || (status.phase == Phase::Skipped && status.error.is_some())
}

fn binding_error(input: &str, node_id: &str, var: &str) -> ExecutionError {
    ExecutionError::user(
        codes::BINDING_RESOLUTION_ERROR,
        format!(
            "input '{}' is bound to output '{}' of node '{}', which is not available",
            input, var, node_id
        ),
    )
}

fn deadline_exceeded(node: &Node, status: &NodeStatus) -> Option<ExecutionError> {
    let secs = node.active_deadline_secs?;
    let started_at = status.started_at?;
    let elapsed = Utc::now().signed_duration_since(started_at);
    if elapsed.num_seconds() < i64::try_from(secs).unwrap_or(i64::MAX) {
        return None;
    }
    Some(ExecutionError::user(
        codes::TIMEOUT,
        format!("node exceeded its active deadline of {}s", secs),
    ))
}

/// Wires the standard handlers into a [`NodeExecutor`].
pub struct NodeExecutorBuilder {
    data_store: Arc<dyn DataStore>,
    config: EngineConfig,
    plugins: Option<Arc<dyn PluginResolver>>,
    catalog: Option<Arc<dyn CatalogClient>>,
    launch_plans: Option<Arc<dyn LaunchPlanExecutor>>,
    events: Option<Arc<EventBus>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl NodeExecutorBuilder {
    pub fn with_plugins(mut self, plugins: Arc<dyn PluginResolver>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Catalog used by the task gate. Defaults to the no-op catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Without a launch backend, launch plan nodes are rejected.
    pub fn with_launch_plans(mut self, launch_plans: Arc<dyn LaunchPlanExecutor>) -> Self {
        self.launch_plans = Some(launch_plans);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> NodeExecutor {
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(EngineMetrics::new("skein")));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(self.config.events.capacity)));
        let plugins = self
            .plugins
            .unwrap_or_else(|| Arc::new(PluginRegistry::new()));
        let catalog = match self.catalog {
            Some(catalog) if self.config.catalog.enabled => catalog,
            _ => Arc::new(NoopCatalog),
        };

        let gate = CatalogGate::new(
            catalog,
            metrics.clone(),
            self.config.engine.max_error_message_length,
        );

        let mut handlers = HandlerRegistry::new();
        handlers.register(NodeKind::Start, Arc::new(StartHandler));
        handlers.register(NodeKind::End, Arc::new(EndHandler));
        handlers.register(NodeKind::Task, Arc::new(TaskHandler::new(plugins, gate)));
        handlers.register(NodeKind::Branch, Arc::new(BranchHandler));
        handlers.register(NodeKind::SubWorkflow, Arc::new(SubWorkflowHandler));
        if let Some(launch_plans) = self.launch_plans {
            handlers.register(
                NodeKind::LaunchPlan,
                Arc::new(LaunchPlanHandler::new(launch_plans)),
            );
        }

        NodeExecutor::new(handlers, self.data_store, &self.config, events, metrics)
    }
}
