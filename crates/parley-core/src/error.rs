use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    // Graph definition errors
    #[error("Flow has no start node")]
    MissingStartNode,

    #[error("Flow has more than one start node: {}", ids.join(", "))]
    DuplicateStartNode { ids: Vec<String> },

    #[error("Duplicate node id in flow: {0}")]
    DuplicateNodeId(String),

    #[error("Node not found in flow: {0}")]
    NodeNotFound(String),

    #[error("Edge {edge} points at unknown node: {target}")]
    DanglingEdge { edge: String, target: String },

    #[error("Invalid flow definition: {0}")]
    Graph(String),

    // Execution errors
    #[error("Flow engine already started")]
    AlreadyStarted,

    #[error("Flow did not finish within {0} steps")]
    StepLimitExceeded(usize),

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

impl ParleyError {
    /// Whether this error was caused by a malformed flow definition.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::MissingStartNode
                | Self::DuplicateStartNode { .. }
                | Self::DuplicateNodeId(_)
                | Self::NodeNotFound(_)
                | Self::DanglingEdge { .. }
                | Self::Graph(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
