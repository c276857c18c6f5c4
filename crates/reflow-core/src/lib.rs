pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{DefinitionError, ReflowError, Result};
pub use event::EventBus;
pub use graph::{Edge, EdgeCondition, Graph, Node, NodeKind};
pub use traits::NodeExecutor;
pub use types::*;
