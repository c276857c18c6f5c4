use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

pub use reflow_core::config::DEFAULT_MAX_ITERATIONS;
use reflow_core::error::{ReflowError, Result};
use reflow_core::event::EventBus;
use reflow_core::graph::Graph;
use reflow_core::traits::NodeExecutor;
use reflow_core::types::{ExecutionContext, Message};

use super::classify::is_error_output;
use super::result::{RunResult, RunStatus};
use super::state::NodeRunState;
use crate::executors::ExecutorRegistry;
use crate::run_log::{details, RunLog};


/// Characters of output kept in `node_complete` log entries.
const PREVIEW_CHARS: usize = 2000;

/// Source tag of the message that seeds the start nodes.
pub const SEED_SOURCE: &str = "TASK";

/// Iteration-driven workflow scheduler.
///
/// Each tick collects every triggered node holding input, runs them all
/// concurrently, then records outputs and fires outgoing edges in node id
/// order. Cycles are allowed; the iteration bound ends them.
pub struct GraphExecutor {
    graph: Graph,
    executors: BTreeMap<String, Arc<dyn NodeExecutor>>,
    max_iterations: usize,
    shared: Arc<HashMap<String, Value>>,
    event_bus: Option<Arc<EventBus>>,
}

impl GraphExecutor {
    /// Bind every node to its executor.
    ///
    /// Fails if any node's kind has no registered executor.
    pub fn new(graph: Graph, registry: &ExecutorRegistry) -> Result<Self> {
        let executors = graph
            .nodes
            .values()
            .map(|node| Ok((node.id.clone(), registry.resolve(node)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            graph,
            executors,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            shared: Arc::new(HashMap::new()),
            event_bus: None,
        })
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Values visible to every executor through [`ExecutionContext::shared`].
    pub fn with_shared_context(mut self, shared: HashMap<String, Value>) -> Self {
        self.shared = Arc::new(shared);
        self
    }

    /// Publish every log entry on `bus` as it is recorded.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the workflow with `prompt` as the initial user message.
    pub async fn execute(&self, prompt: impl Into<String>) -> RunResult {
        self.execute_message(Message::user(prompt, SEED_SOURCE)).await
    }

    /// Run the workflow, seeding every start node with `initial`.
    pub async fn execute_message(&self, initial: Message) -> RunResult {
        let started = Instant::now();
        let executed_at = Utc::now();
        let log = RunLog::new(self.event_bus.clone());
        let graph_id = self.graph.id.as_str();

        let mut states: BTreeMap<String, NodeRunState> = self
            .graph
            .nodes
            .keys()
            .map(|id| (id.clone(), NodeRunState::new()))
            .collect();

        info!(
            workflow_id = %graph_id,
            nodes = self.graph.nodes.len(),
            max_iterations = self.max_iterations,
            "Starting workflow"
        );
        log.record(
            "workflow_start",
            "",
            0,
            details([
                ("workflow_id", json!(graph_id)),
                ("start_nodes", json!(self.graph.start)),
                ("end_nodes", json!(self.graph.end)),
                ("max_iterations", json!(self.max_iterations)),
            ]),
        );

        for id in &self.graph.start {
            if let Some(state) = states.get_mut(id) {
                state.deliver(initial.clone());
                state.triggered = true;
            }
        }

        let mut iteration = 0usize;
        let mut failure: Option<String> = None;
        let status = loop {
            if iteration >= self.max_iterations {
                warn!(workflow_id = %graph_id, iteration, "Iteration limit reached");
                log.record(
                    "iteration_limit_reached",
                    "",
                    iteration,
                    details([("max_iterations", json!(self.max_iterations))]),
                );
                break RunStatus::Exhausted;
            }

            let ready: Vec<String> = states
                .iter()
                .filter(|(_, s)| s.is_ready())
                .map(|(id, _)| id.clone())
                .collect();
            if ready.is_empty() {
                debug!(workflow_id = %graph_id, iteration, "No triggered nodes");
                log.record("no_triggered_nodes", "", iteration, Map::new());
                break RunStatus::Completed;
            }

            iteration += 1;
            info!(iteration, nodes = ?ready, "Starting iteration");
            log.record(
                "iteration_start",
                "",
                iteration,
                details([("triggered_nodes", json!(ready))]),
            );

            if let Err(e) = self.run_tick(iteration, &ready, &mut states, &log).await {
                error!(workflow_id = %graph_id, iteration, error = %e, "Workflow aborted");
                log.record(
                    "workflow_error",
                    "",
                    iteration,
                    details([("error", json!(e.to_string()))]),
                );
                failure = Some(e.to_string());
                break RunStatus::Failed;
            }

            if let Some(end) = self.reached_end(&states) {
                info!(node_id = %end, iteration, "End node reached");
                break RunStatus::Completed;
            }
        };

        let elapsed = started.elapsed();
        if status != RunStatus::Failed {
            log.record(
                "execution_complete",
                "",
                iteration,
                details([
                    ("status", json!(status)),
                    ("iterations", json!(iteration)),
                ]),
            );
            log.record(
                "workflow_complete",
                "",
                iteration,
                details([
                    ("status", json!(status)),
                    ("elapsed_secs", json!(elapsed.as_secs_f64())),
                ]),
            );
        }
        info!(
            workflow_id = %graph_id,
            %status,
            iterations = iteration,
            elapsed_ms = elapsed.as_millis() as u64,
            "Workflow finished"
        );

        let final_output = self.final_output(&states);
        let execution_counts = states
            .iter()
            .map(|(id, s)| (id.clone(), s.execution_count))
            .collect();
        let node_outputs = states
            .into_iter()
            .filter(|(_, s)| !s.outputs.is_empty())
            .map(|(id, s)| (id, s.outputs))
            .collect();

        RunResult {
            workflow_id: self.graph.id.clone(),
            status,
            success: status.is_success(),
            iterations: iteration,
            final_output,
            node_outputs,
            execution_counts,
            execution_log: log.entries(),
            elapsed,
            error: failure,
            executed_at,
        }
    }

    /// Execute the collected nodes and apply their results.
    async fn run_tick(
        &self,
        iteration: usize,
        ready: &[String],
        states: &mut BTreeMap<String, NodeRunState>,
        log: &RunLog,
    ) -> Result<()> {
        let ctx = self.context_snapshot(states);

        let mut jobs = Vec::with_capacity(ready.len());
        for id in ready {
            let node = self
                .graph
                .node(id)
                .ok_or_else(|| ReflowError::UnknownNode(id.clone()))?;
            let executor = self
                .executors
                .get(id)
                .cloned()
                .ok_or_else(|| ReflowError::MissingExecutor {
                    node: id.clone(),
                    kind: node.kind.to_string(),
                })?;
            let state = states
                .get_mut(id)
                .ok_or_else(|| ReflowError::UnknownNode(id.clone()))?;
            state.triggered = false;
            let inputs = state.pending_inputs.clone();

            debug!(node_id = %id, executor = executor.name(), inputs = inputs.len(), "Executing node");
            log.record(
                "node_start",
                id,
                iteration,
                details([
                    ("executor", json!(executor.name())),
                    ("input_count", json!(inputs.len())),
                ]),
            );
            jobs.push((node, executor, inputs));
        }

        let results = join_all(jobs.into_iter().map(|(node, executor, inputs)| {
            let ctx = ctx.clone();
            async move { executor.execute(node, inputs, ctx).await }
        }))
        .await;

        // Record every result before any edge fires so data delivered this
        // tick is not cleared by a later record in the same tick.
        let mut outputs = Vec::with_capacity(ready.len());
        let mut violation = None;
        for (id, result) in ready.iter().zip(results) {
            match result {
                Ok(output) => {
                    let retain = self.graph.node(id).map(|n| n.retain_inputs).unwrap_or(false);
                    if let Some(state) = states.get_mut(id) {
                        state.record(output.clone(), iteration, retain);
                        log.record(
                            "node_complete",
                            id,
                            iteration,
                            details([
                                ("output_preview", json!(preview(&output.content, PREVIEW_CHARS))),
                                ("output_length", json!(output.content.chars().count())),
                                ("execution_count", json!(state.execution_count)),
                            ]),
                        );
                    }
                    outputs.push((id, output));
                }
                Err(e) => {
                    error!(node_id = %id, error = %e, "Executor returned an error");
                    if violation.is_none() {
                        violation = Some(ReflowError::Executor {
                            node: id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        if let Some(e) = violation {
            return Err(e);
        }

        for (id, output) in outputs {
            self.propagate(iteration, id, &output, states, log);
        }
        Ok(())
    }

    /// Fire the outgoing edges of `from` whose condition accepts `output`.
    fn propagate(
        &self,
        iteration: usize,
        from: &str,
        output: &Message,
        states: &mut BTreeMap<String, NodeRunState>,
        log: &RunLog,
    ) {
        if is_error_output(output) {
            warn!(node_id = %from, iteration, "Error output detected, edges not traversed");
            log.record(
                "error_output_detected",
                from,
                iteration,
                details([("output_preview", json!(preview(&output.content, 200)))]),
            );
            return;
        }

        let edges: Vec<_> = self.graph.outgoing_edges(from).collect();
        log.record(
            "processing_edges",
            from,
            iteration,
            details([("edge_count", json!(edges.len()))]),
        );

        for edge in edges {
            if !edge.condition.evaluate(&output.content) {
                debug!(from = %edge.from, to = %edge.to, condition = %edge.condition, "Edge condition failed");
                log.record(
                    "edge_condition_failed",
                    from,
                    iteration,
                    details([
                        ("to", json!(edge.to)),
                        ("condition", json!(edge.condition.to_string())),
                    ]),
                );
                continue;
            }

            let Some(target) = states.get_mut(&edge.to) else {
                continue;
            };
            if edge.carry_data {
                target.deliver(output.routed(&edge.from, &edge.to));
            }
            if edge.trigger {
                target.triggered = true;
                debug!(from = %edge.from, to = %edge.to, "Node triggered");
                log.record(
                    "node_triggered",
                    &edge.to,
                    iteration,
                    details([
                        ("from", json!(edge.from)),
                        ("carry_data", json!(edge.carry_data)),
                    ]),
                );
            }
        }
    }

    /// Latest output per node, keyed by id and by description.
    fn context_snapshot(&self, states: &BTreeMap<String, NodeRunState>) -> ExecutionContext {
        let mut prior = HashMap::new();
        for (id, state) in states {
            let Some(last) = state.last_output() else {
                continue;
            };
            if let Some(desc) = self.graph.node(id).and_then(|n| n.description.as_deref()) {
                if desc != id {
                    prior.insert(desc.to_string(), last.content.clone());
                }
            }
            prior.insert(id.clone(), last.content.clone());
        }
        ExecutionContext {
            prior_outputs: Arc::new(prior),
            shared: self.shared.clone(),
        }
    }

    fn reached_end<'a>(&'a self, states: &BTreeMap<String, NodeRunState>) -> Option<&'a str> {
        self.graph
            .end
            .iter()
            .find(|id| {
                states
                    .get(*id)
                    .map(|s| s.executed && s.last_output().is_some())
                    .unwrap_or(false)
            })
            .map(|id| id.as_str())
    }

    /// Last output of the first end node that produced one, else of the
    /// most recently executed sink node (ties go to the lower id).
    fn final_output(&self, states: &BTreeMap<String, NodeRunState>) -> Option<Message> {
        for id in &self.graph.end {
            if let Some(out) = states.get(id).and_then(|s| s.last_output()) {
                return Some(out.clone());
            }
        }

        self.graph
            .sink_nodes()
            .into_iter()
            .filter_map(|id| {
                let state = states.get(id)?;
                state.last_output().map(|out| (state.last_tick, id, out))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(a.1)))
            .map(|(_, _, out)| out.clone())
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
