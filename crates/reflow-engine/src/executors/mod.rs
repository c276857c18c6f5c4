//! Built-in node executors and the registry that binds them to node kinds.

pub mod local;
pub mod passthrough;

use std::collections::HashMap;
use std::sync::Arc;

use reflow_core::error::{ReflowError, Result};
use reflow_core::graph::{Node, NodeKind};
use reflow_core::traits::NodeExecutor;

pub use local::{LocalExecutor, LocalFn, LocalFunctions};
pub use passthrough::PassthroughExecutor;

/// Maps each [`NodeKind`] to the executor that runs it.
///
/// Consulted once per node when a scheduler is built; the tick loop only
/// ever sees the resolved `Arc<dyn NodeExecutor>`.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-process executors (passthrough and local).
    /// Remote nodes still need an executor registered by the caller.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NodeKind::Passthrough, Arc::new(PassthroughExecutor));
        registry.register(NodeKind::Local, Arc::new(LocalExecutor::with_builtins()));
        registry
    }

    /// Register (or replace) the executor for `kind`.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn with(mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeExecutor>> {
        self.get(node.kind).ok_or_else(|| ReflowError::MissingExecutor {
            node: node.id.clone(),
            kind: node.kind.to_string(),
        })
    }
}
