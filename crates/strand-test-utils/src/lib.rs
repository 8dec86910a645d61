//! Mocks and fixtures shared by the Strand test suites.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use strand_core::config::ModelConfig;
use strand_core::error::{Result, StrandError};
use strand_core::tool::{ToolDescriptor, ToolParameterDescriptor, ToolParameterType};
use strand_core::traits::{PromptExecutor, Tool, ToolOutput};
use strand_core::types::{Message, ToolCall};

/// One request seen by a [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

type Responder = Box<dyn Fn(&[Message], &[ToolDescriptor]) -> Vec<Message> + Send + Sync>;

/// Prompt executor that replays canned responses in order.
///
/// Once the script runs out, the fallback responder (if any) answers;
/// otherwise the request fails with `StrandError::Llm`.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Vec<Message>>>,
    fallback: Option<Responder>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response made of several messages.
    pub fn then(self, response: Vec<Message>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    /// Queue a plain assistant reply.
    pub fn then_text(self, text: &str) -> Self {
        self.then(vec![Message::assistant(text)])
    }

    /// Queue a single tool call.
    pub fn then_tool_call(self, tool: &str, args: serde_json::Value) -> Self {
        let call = ToolCall::new(Some(format!("call-{}", tool)), tool, args.to_string());
        self.then(vec![Message::tool_call(call)])
    }

    /// Answer every unscripted request with `f`.
    pub fn with_fallback(
        mut self,
        f: impl Fn(&[Message], &[ToolDescriptor]) -> Vec<Message> + Send + Sync + 'static,
    ) -> Self {
        self.fallback = Some(Box::new(f));
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptExecutor for ScriptedExecutor {
    fn execute(
        &self,
        _model: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDescriptor],
    ) -> BoxFuture<'_, Result<Vec<Message>>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.clone(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let next = self.script.lock().unwrap().pop_front();
        let response = match (next, &self.fallback) {
            (Some(r), _) => Ok(r),
            (None, Some(f)) => Ok(f(&messages, tools)),
            (None, None) => Err(StrandError::Llm("script exhausted".to_string())),
        };
        Box::pin(async move { response })
    }
}

/// Echoes its `text` argument.
pub struct EchoTool;

impl Tool for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("echo", "Echo the given text").with_required(
            ToolParameterDescriptor::new("text", "Text to echo", ToolParameterType::String),
        )
    }

    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| StrandError::ToolValidation("echo: missing text".into()))?;
            Ok(ToolOutput::text(text))
        })
    }
}

#[derive(Deserialize)]
struct AddInput {
    a: i64,
    b: i64,
}

/// Adds two integers.
pub struct AddTool;

impl Tool for AddTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("add", "Add two integers")
            .with_required(ToolParameterDescriptor::new(
                "a",
                "First operand",
                ToolParameterType::Integer,
            ))
            .with_required(ToolParameterDescriptor::new(
                "b",
                "Second operand",
                ToolParameterType::Integer,
            ))
    }

    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let input: AddInput = serde_json::from_value(args)
                .map_err(|e| StrandError::ToolValidation(format!("add: {}", e)))?;
            let sum = input.a + input.b;
            Ok(ToolOutput::new(sum.to_string(), json!(sum)))
        })
    }
}

/// Always fails at execution time.
pub struct FailingTool;

impl Tool for FailingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("fail", "Always fails")
    }

    fn execute(&self, _args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            Err(StrandError::ToolExecution {
                tool: "fail".to_string(),
                message: "intentional failure".to_string(),
            })
        })
    }
}

/// Sleeps far past its own one-second timeout.
pub struct SlowTool;

impl Tool for SlowTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("slow", "Never finishes in time")
    }

    fn execute(&self, _args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::text("late"))
        })
    }

    fn timeout_secs(&self) -> u64 {
        1
    }
}
