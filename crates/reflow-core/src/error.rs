use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReflowError {
    // Definition errors
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("No executor registered for node {node} (kind {kind})")]
    MissingExecutor { node: String, kind: String },

    // Execution errors
    #[error("Executor failed for node {node}: {message}")]
    Executor { node: String, message: String },

    #[error("Provider request failed ({status}): {message}")]
    ProviderRequest { status: u16, message: String },

    #[error("Provider request error: {0}")]
    Transport(String),

    #[error("Provider request timed out after {0}s")]
    Timeout(u64),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load-time failures. Always raised before any node executes.
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("Malformed workflow definition: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {from}->{to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("{role} node '{id}' is not defined in the graph")]
    UnknownEndpoint { role: &'static str, id: String },

    #[error("Unresolved variable ${{{0}}}")]
    UnresolvedVariable(String),

    #[error("Unsupported node type: {0}")]
    UnknownNodeType(String),

    #[error("Unsupported edge condition: {0}")]
    UnknownCondition(String),
}

pub type Result<T> = std::result::Result<T, ReflowError>;
