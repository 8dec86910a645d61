//! Tool environments: where tool calls are executed and where run outcomes go.

mod channel;
mod local;

pub use channel::{ChannelEnvironment, EnvironmentHandle};
pub use local::LocalEnvironment;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use strand_core::error::{Result, StrandError};
use strand_core::types::{ReceivedToolResult, ToolCall};

/// Dispatches tool calls and receives the run's final signals.
pub trait AgentEnvironment: Send + Sync + 'static {
    /// Called by the runner before each run. Clears whatever the
    /// environment tracks per run, such as a termination already sent.
    fn begin_run(&self) {}

    /// Execute `calls`, returning results in the same order.
    ///
    /// A client-side error or termination surfaces as
    /// `StrandError::TerminatedByClient`.
    fn execute_tools(&self, calls: Vec<ToolCall>) -> BoxFuture<'_, Result<Vec<ReceivedToolResult>>>;

    /// Tell the environment about a run failure. Does not end the run by itself.
    fn report_problem<'a>(&'a self, error: &'a StrandError) -> BoxFuture<'a, Result<()>>;

    /// Announce that the run is complete. Allowed once per run.
    fn send_termination(&self, result: Option<serde_json::Value>) -> BoxFuture<'_, Result<()>>;
}

/// Messages an environment sends to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentMessage {
    /// Must arrive exactly once, before anything else.
    Initialize,
    ToolResult {
        result: ReceivedToolResult,
    },
    ToolResults {
        results: Vec<ReceivedToolResult>,
    },
    Error {
        message: String,
    },
    Termination {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EnvironmentMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolResults { .. } => "tool_results",
            Self::Error { .. } => "error",
            Self::Termination { .. } => "termination",
        }
    }
}

/// Messages the agent sends to an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    ToolCalls {
        calls: Vec<ToolCall>,
    },
    Problem {
        message: String,
    },
    Termination {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn environment_message_wire_shape() {
        let msg: EnvironmentMessage =
            serde_json::from_value(json!({"type": "error", "message": "boom"})).unwrap();
        assert_eq!(msg, EnvironmentMessage::Error { message: "boom".into() });
        assert_eq!(msg.kind(), "error");

        let term: EnvironmentMessage =
            serde_json::from_value(json!({"type": "termination"})).unwrap();
        assert_eq!(
            term,
            EnvironmentMessage::Termination {
                result: None,
                error: None
            }
        );
    }

    #[test]
    fn agent_message_tags() {
        let value = serde_json::to_value(AgentMessage::Problem {
            message: "x".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "problem");
    }
}
