use futures::future::BoxFuture;

use crate::error::Result;
use crate::graph::Node;
use crate::types::{ExecutionContext, Message};

/// Runs a single node against its pending inputs.
///
/// Implementations own their resilience: rate limits are retried internally
/// and terminal failures are returned as an `is_error` message. An `Err`
/// reaching the scheduler means the contract itself was violated and aborts
/// the run.
pub trait NodeExecutor: Send + Sync + 'static {
    /// Executor name (used in logs).
    fn name(&self) -> &str;

    /// Produce exactly one output message for `node`.
    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Vec<Message>,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>>;
}
