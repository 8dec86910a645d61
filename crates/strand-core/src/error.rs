use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrandError {
    // Graph execution errors
    #[error("Agent stuck in node {node}: no outgoing edge accepted output {output}")]
    Stuck { node: String, output: String },

    #[error("Agent reached the maximum number of iterations ({0})")]
    MaxIterationsReached(usize),

    #[error("Agent terminated by client: {0}")]
    TerminatedByClient(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Type mismatch in node {node}: expected {expected}, got {actual}")]
    TypeMismatch {
        node: String,
        expected: String,
        actual: String,
    },

    #[error("Execution point already set for this run (requested {0})")]
    ExecutionPointAlreadySet(String),

    #[error("Node {node} failed: {message}")]
    Node { node: String, message: String },

    #[error("Graph build error: {0}")]
    GraphBuild(String),

    // Environment protocol errors
    #[error("Environment sent initialization twice")]
    DoubleInitialization,

    #[error("Unexpected message from environment: {0}")]
    UnexpectedMessage(String),

    #[error("Termination was already sent for this run")]
    TerminationAlreadySent,

    // Agent errors
    #[error("Agent is already running")]
    AlreadyRunning,

    #[error("Agent cancelled")]
    Cancelled,

    // LLM errors
    #[error("LLM request failed: {0}")]
    Llm(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrandError {
    /// Conditions raised by the engine or the environment protocol itself.
    ///
    /// These abort the run directly; anything else escaping a node is offered
    /// to the run's error handler first.
    pub fn is_engine_fatal(&self) -> bool {
        matches!(
            self,
            Self::Stuck { .. }
                | Self::MaxIterationsReached(_)
                | Self::TerminatedByClient(_)
                | Self::DoubleInitialization
                | Self::UnexpectedMessage(_)
                | Self::TypeMismatch { .. }
                | Self::NodeNotFound(_)
                | Self::ExecutionPointAlreadySet(_)
                | Self::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, StrandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuck_names_node() {
        let err = StrandError::Stuck {
            node: "weather/ask".into(),
            output: "ToolCall(get_weather)".into(),
        };
        let text = err.to_string();
        assert!(text.contains("weather/ask"));
        assert!(text.contains("get_weather"));
    }

    #[test]
    fn engine_fatal_classification() {
        assert!(StrandError::MaxIterationsReached(3).is_engine_fatal());
        assert!(StrandError::DoubleInitialization.is_engine_fatal());
        assert!(!StrandError::Llm("boom".into()).is_engine_fatal());
        assert!(!StrandError::ToolValidation("bad".into()).is_engine_fatal());
    }
}
