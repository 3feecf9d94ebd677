//! Mocks and fixtures shared by the Skein test suites.

pub mod catalog;
pub mod fixtures;
pub mod launch;
pub mod plugin;

pub use catalog::MockCatalog;
pub use fixtures::{
    branch_workflow, echo_template, int_inputs, single_task_workflow, temp_config, test_context,
};
pub use launch::{LaunchRecord, LaunchResponse, MockLaunchPlanExecutor, StatusResponse};
pub use plugin::{ScriptedPlugin, Step};
