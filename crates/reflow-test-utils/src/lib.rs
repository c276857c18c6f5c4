//! Test executors and graph fixtures shared by the reflow crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use reflow_core::error::{ReflowError, Result};
use reflow_core::graph::{Edge, Graph, Node};
use reflow_core::traits::NodeExecutor;
use reflow_core::types::{ExecutionContext, Message};

/// Emits `"<node id>:<latest input>"`.
pub struct EchoExecutor;

impl NodeExecutor for EchoExecutor {
    fn name(&self) -> &str {
        "echo"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Vec<Message>,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            let last = inputs.last().map(|m| m.content.as_str()).unwrap_or_default();
            Ok(Message::assistant(format!("{}:{}", node.id, last), node.id.as_str()))
        })
    }
}

/// Replies from a per-node script.
///
/// Each node gets its scripted replies in order; once they run out the last
/// one repeats. Nodes without a script echo like [`EchoExecutor`]. Every call
/// is recorded with the inputs it saw.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<(String, Vec<Message>)>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `content` for `node_id`.
    pub fn always(self, node_id: &str, content: &str) -> Self {
        self.replies(node_id, [content])
    }

    pub fn replies<I, S>(mut self, node_id: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts
            .insert(node_id.to_string(), replies.into_iter().map(Into::into).collect());
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Recorded `(node_id, inputs)` pairs, in call order.
    pub fn calls(&self) -> Vec<(String, Vec<Message>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == node_id)
            .count()
    }
}

impl NodeExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Vec<Message>,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let content = {
                let mut calls = self.calls.lock().unwrap();
                let seen = calls.iter().filter(|(id, _)| *id == node.id).count();
                calls.push((node.id.clone(), inputs.clone()));

                match self.scripts.get(&node.id) {
                    Some(replies) if !replies.is_empty() => {
                        replies[seen.min(replies.len() - 1)].clone()
                    }
                    _ => {
                        let last = inputs.last().map(|m| m.content.as_str()).unwrap_or_default();
                        format!("{}:{}", node.id, last)
                    }
                }
            };
            Ok(Message::assistant(content, node.id.as_str()))
        })
    }
}

/// Breaks the executor contract by returning `Err` on every call.
pub struct FailingExecutor {
    message: String,
    calls: AtomicUsize,
}

impl FailingExecutor {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NodeExecutor for FailingExecutor {
    fn name(&self) -> &str {
        "failing"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        _inputs: Vec<Message>,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ReflowError::Executor {
                node: node.id.clone(),
                message: self.message.clone(),
            })
        })
    }
}

pub fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// Remote nodes `ids[0] -> ids[1] -> ...` joined by always-firing edges,
/// starting at the first id and ending at the last.
pub fn chain_graph(id: &str, nodes: &[&str]) -> Graph {
    let edges = nodes
        .windows(2)
        .map(|w| Edge::always(w[0], w[1]))
        .collect();
    Graph::new(
        id,
        nodes.iter().map(|n| Node::remote(*n)).collect(),
        edges,
        ids(&nodes[..1]),
        ids(&nodes[nodes.len() - 1..]),
    )
    .unwrap()
}

/// `a <-> b`: `a -> b` always, `b -> a` only when `b` says `keyword`.
/// Both nodes are start nodes; there are no end nodes.
pub fn feedback_graph(a: &str, b: &str, keyword: &str) -> Graph {
    Graph::new(
        "feedback",
        vec![Node::remote(a), Node::remote(b)],
        vec![Edge::always(a, b), Edge::keyword(b, a, [keyword], true)],
        ids(&[a, b]),
        vec![],
    )
    .unwrap()
}
