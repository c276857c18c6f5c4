use reflow_core::types::Message;

/// Content markers of a failed provider call.
pub const ERROR_SIGNATURES: &[&str] = &[
    "Error executing",
    "API error:",
    "rate_limit_exceeded",
    "Error code: 4",
    "Error code: 5",
];

/// Only this many leading characters are scanned for signatures.
pub const SCAN_PREFIX_CHARS: usize = 500;

/// Whether a node output must be treated as a failure.
///
/// Error outputs are recorded but never propagated along outgoing edges.
pub fn is_error_output(output: &Message) -> bool {
    if output.is_error_flagged() {
        return true;
    }

    let prefix = match output.content.char_indices().nth(SCAN_PREFIX_CHARS) {
        Some((idx, _)) => &output.content[..idx],
        None => output.content.as_str(),
    };
    ERROR_SIGNATURES.iter().any(|sig| prefix.contains(sig))
}
