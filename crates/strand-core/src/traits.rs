use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::tool::ToolDescriptor;
use crate::types::Message;

/// The model provider behind a session.
///
/// Returns one or more response messages, each either assistant text or a
/// single tool call.
pub trait PromptExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        model: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDescriptor],
    ) -> BoxFuture<'_, Result<Vec<Message>>>;
}

/// Extensible tool execution.
pub trait Tool: Send + Sync + 'static {
    /// Name, description, and parameters shown to the model.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with decoded JSON arguments.
    ///
    /// Rejected arguments are reported as `StrandError::ToolValidation`.
    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Successful tool output: text for the model plus a structured payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub result: serde_json::Value,
}

impl ToolOutput {
    pub fn new(content: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            content: content.into(),
            result,
        }
    }

    /// Text-only output; the structured payload is the text itself.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            result: serde_json::Value::String(content.clone()),
            content,
        }
    }
}
