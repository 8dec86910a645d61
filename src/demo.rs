//! Offline demo: a rule-based model and the strategy the CLI runs.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use strand_agent::{CheckpointStore, GraphBuilder, HistoryCompression, Strategy};
use strand_core::config::ModelConfig;
use strand_core::error::Result;
use strand_core::tool::ToolDescriptor;
use strand_core::traits::PromptExecutor;
use strand_core::types::{Message, MessageContent, Role, ToolCall};

pub const STRATEGY_NAME: &str = "assistant";

/// Stand-in model that answers by rule instead of calling a provider.
///
/// A user message is repeated back through `say_to_user`; once that tool has
/// answered, the run is closed with `exit`.
pub struct RuleExecutor;

impl RuleExecutor {
    fn respond(messages: &[Message], tools: &[ToolDescriptor]) -> Message {
        let visible = |name: &str| tools.iter().any(|t| t.name == name);
        let Some(last) = messages.last() else {
            return Message::assistant("Nothing to do.");
        };

        match &last.content {
            MessageContent::ToolResult { result } if result.tool == "say_to_user" && visible("exit") => {
                let said = messages
                    .iter()
                    .rev()
                    .filter_map(Message::as_tool_call)
                    .find(|c| c.tool == "say_to_user")
                    .and_then(|c| c.args_json().ok())
                    .and_then(|a| a["message"].as_str().map(str::to_string))
                    .unwrap_or_else(|| result.content.clone());
                let args = json!({ "result": said });
                Message::tool_call(ToolCall::new(Some("call-exit".into()), "exit", args.to_string()))
            }
            MessageContent::ToolResult { result } => Message::assistant(result.content.clone()),
            MessageContent::Text { text } if last.role == Role::User && visible("say_to_user") => {
                let args = json!({ "message": format!("You said: {}", text) });
                Message::tool_call(ToolCall::new(
                    Some("call-say".into()),
                    "say_to_user",
                    args.to_string(),
                ))
            }
            MessageContent::Text { text } => Message::assistant(text.clone()),
            MessageContent::ToolCall { .. } => Message::assistant("Waiting for the tool."),
        }
    }
}

impl PromptExecutor for RuleExecutor {
    fn execute(
        &self,
        _model: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDescriptor],
    ) -> BoxFuture<'_, Result<Vec<Message>>> {
        let reply = Self::respond(&messages, tools);
        Box::pin(async move { Ok(vec![reply]) })
    }
}

/// Ask, run tools until `exit` answers, and return the final text.
///
/// With a store, a checkpoint is saved before the first model request.
pub fn strategy(store: Option<Arc<CheckpointStore>>) -> Result<Strategy<String, String>> {
    let mut b = GraphBuilder::<String, String>::strategy(STRATEGY_NAME);
    let ask = b.llm_request("ask");
    let call = b.execute_tool("call");
    let send = b.llm_send_tool_result("send");
    let compact = b.compress_history_if_over::<Message>("compact", HistoryCompression::Chunked(8));

    match store {
        Some(store) => {
            let save = b.save_checkpoint("checkpoint", store, &ask);
            b.edge(b.start().forward_to(&save));
            b.edge(save.forward_to(&ask));
        }
        None => b.edge(b.start().forward_to(&ask)),
    }

    b.edge(ask.forward_to(&call).on_tool_call(|_| true));
    b.edge(ask.forward_to(&b.finish()).on_assistant_message(|_| true));
    b.edge(
        call.forward_to(&b.finish())
            .on_tool_result_success(|r| r.tool == "exit")
            .transformed(|_, r| r.content),
    );
    b.edge(call.forward_to(&send));
    b.edge(send.forward_to(&compact));
    b.edge(compact.forward_to(&call).on_tool_call(|_| true));
    b.edge(compact.forward_to(&b.finish()).on_assistant_message(|_| true));

    b.build()
}
