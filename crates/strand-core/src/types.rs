use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StrandError};

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Correlation id, when the provider assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tool: String,
    /// Serialized JSON arguments.
    pub args: String,
}

impl ToolCall {
    pub fn new(id: Option<String>, tool: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            id,
            tool: tool.into(),
            args: args.into(),
        }
    }

    /// Parse the argument text. Empty arguments parse as an empty object.
    pub fn args_json(&self) -> Result<serde_json::Value> {
        if self.args.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.args)
            .map_err(|e| StrandError::ToolValidation(format!("{}: {}", self.tool, e)))
    }
}

/// A tool result as received back from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceivedToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tool: String,
    /// Raw textual content shown to the model.
    pub content: String,
    /// Structured payload; `None` or `null` means the call did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ReceivedToolResult {
    pub fn success(
        call: &ToolCall,
        content: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            id: call.id.clone(),
            tool: call.tool.clone(),
            content: content.into(),
            result: Some(result),
        }
    }

    pub fn failure(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            tool: call.tool.clone(),
            content: content.into(),
            result: None,
        }
    }

    /// Whether the call succeeded: a payload is present and is not JSON `null`.
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_some_and(|v| !v.is_null())
    }
}

/// Body of a chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    ToolCall { call: ToolCall },
    ToolResult { result: ReceivedToolResult },
}

/// A chat message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Set on messages produced by history compression.
    #[serde(default)]
    pub summary: bool,
}

impl Message {
    fn text_with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
            timestamp: Some(Utc::now()),
            summary: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_with_role(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_with_role(Role::Assistant, text)
    }

    /// A compression summary. Carried as an assistant message.
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            summary: true,
            ..Self::text_with_role(Role::Assistant, text)
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall { call },
            timestamp: Some(Utc::now()),
            summary: false,
        }
    }

    pub fn tool_result(result: ReceivedToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult { result },
            timestamp: Some(Utc::now()),
            summary: false,
        }
    }

    /// Text content, if this is a plain text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match &self.content {
            MessageContent::ToolCall { call } => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ReceivedToolResult> {
        match &self.content {
            MessageContent::ToolResult { result } => Some(result),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Name of the tool this message refers to, for tool calls and results.
    pub fn tool_name(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolCall { call } => Some(&call.tool),
            MessageContent::ToolResult { result } => Some(&result.tool),
            MessageContent::Text { .. } => None,
        }
    }

    /// One-line rendering used in transcripts and summaries.
    pub fn render(&self) -> String {
        match &self.content {
            MessageContent::Text { text } => format!("{:?}: {}", self.role, text),
            MessageContent::ToolCall { call } => {
                format!("Assistant called tool `{}` with {}", call.tool, call.args)
            }
            MessageContent::ToolResult { result } => {
                format!("Tool `{}` returned: {}", result.tool, result.content)
            }
        }
    }
}

/// Agent event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Run created and about to start.
    RunStarted { run_id: RunId, strategy: String },
    /// A graph node started executing.
    NodeStarted { run_id: RunId, node_id: String },
    /// A graph node completed.
    NodeCompleted { run_id: RunId, node_id: String },
    /// Model request issued.
    LlmCall { run_id: RunId, with_tools: bool },
    /// Tool execution started.
    ToolStart { run_id: RunId, call: ToolCall },
    /// Tool execution completed.
    ToolEnd {
        run_id: RunId,
        result: ReceivedToolResult,
    },
    /// Agent run completed.
    RunComplete { run_id: RunId, interrupted: bool },
    /// Agent run failed.
    RunError { run_id: RunId, error: String },
}

impl AgentEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::LlmCall { run_id, .. }
            | Self::ToolStart { run_id, .. }
            | Self::ToolEnd { run_id, .. }
            | Self::RunComplete { run_id, .. }
            | Self::RunError { run_id, .. } => run_id,
        }
    }

    /// Whether this is the last event of its run.
    pub fn ends_run(&self) -> bool {
        matches!(self, Self::RunComplete { .. } | Self::RunError { .. })
    }
}
