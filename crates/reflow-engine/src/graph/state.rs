use reflow_core::types::Message;

/// Run-time record for one node, created at run start and dropped with the run.
#[derive(Debug, Clone, Default)]
pub struct NodeRunState {
    pub pending_inputs: Vec<Message>,
    /// Every message this node emitted, oldest first. Append-only.
    pub outputs: Vec<Message>,
    pub triggered: bool,
    pub executed: bool,
    pub execution_count: usize,
    /// Tick of the most recent execution (0 = never ran).
    pub last_tick: usize,
}

impl NodeRunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ready to run this tick: triggered and holding input.
    pub fn is_ready(&self) -> bool {
        self.triggered && !self.pending_inputs.is_empty()
    }

    pub fn deliver(&mut self, message: Message) {
        self.pending_inputs.push(message);
    }

    /// Record a finished execution.
    pub fn record(&mut self, output: Message, tick: usize, retain_inputs: bool) {
        self.outputs.push(output);
        self.executed = true;
        self.execution_count += 1;
        self.last_tick = tick;
        if !retain_inputs {
            self.pending_inputs.clear();
        }
    }

    pub fn last_output(&self) -> Option<&Message> {
        self.outputs.last()
    }
}
