//! Graph execution engine.
//!
//! The [`GraphExecutor`] drives a [`Graph`] tick by tick: every triggered node
//! holding input runs concurrently, then outputs are recorded and outgoing
//! edges fire in node id order. Error outputs are recorded but never
//! propagated. A run ends when an end node produces output, when nothing is
//! left to run, or at the iteration bound.

pub mod classify;
pub mod executor;
pub mod layers;
pub mod result;
pub mod state;

pub use reflow_core::graph::{Edge, EdgeCondition, Graph, Node, NodeKind};

pub use classify::is_error_output;
pub use executor::{GraphExecutor, DEFAULT_MAX_ITERATIONS};
pub use layers::topological_layers;
pub use result::{RunDocument, RunResult, RunStatus};
pub use state::NodeRunState;
