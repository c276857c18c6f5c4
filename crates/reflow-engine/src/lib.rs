pub mod executors;
pub mod graph;
pub mod loader;
pub mod run_log;

pub use executors::{ExecutorRegistry, LocalExecutor, LocalFunctions, PassthroughExecutor};
pub use graph::{
    is_error_output, topological_layers, GraphExecutor, NodeRunState, RunDocument, RunResult,
    RunStatus, DEFAULT_MAX_ITERATIONS,
};
pub use loader::{load, load_path, load_with, LoadOptions, WorkflowDefinition};
pub use run_log::{RunId, RunLog, RunLogger};
