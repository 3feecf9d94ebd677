pub mod branch;
pub mod dag;
pub mod executor;
pub mod handler;
pub mod lookup;
pub mod metrics;
pub mod structural;
pub mod subworkflow;
pub mod task;
pub mod workflow;

pub use branch::BranchHandler;
pub use dag::{DagStructure, LeafNodeDag};
pub use executor::{NodeExecutor, NodeExecutorBuilder};
pub use handler::{
    HandlerPhase, HandlerRegistry, NodeExecutionContext, NodeHandler, NodeOutcome,
    RecursiveNodeExecutor, Transition,
};
pub use lookup::{ContextualNodeLookup, FixtureNodeLookup, NodeGetter, NodeLookup};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use structural::{EndHandler, StartHandler};
pub use subworkflow::{LaunchPlanHandler, SubWorkflowHandler};
pub use task::{CatalogGate, EchoPlugin, NoopCatalog, PluginRegistry, TaskHandler};
pub use workflow::{WorkflowExecutor, WorkflowPhase};
