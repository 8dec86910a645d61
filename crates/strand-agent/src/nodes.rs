//! Ready-made nodes for the common steps of an agent graph.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use strand_core::error::{Result, StrandError};
use strand_core::types::{Message, ReceivedToolResult, ToolCall};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::compression::HistoryCompression;
use crate::context::AgentContext;
use crate::graph::{GraphBuilder, GraphValue, NodeRef};

impl<I: GraphValue, O: GraphValue> GraphBuilder<I, O> {
    /// Passes its input through.
    pub fn do_nothing<T: GraphValue>(&mut self, name: &str) -> NodeRef<T, T> {
        self.node(name, |_ctx, input: T| async move { Ok::<T, StrandError>(input) })
    }

    /// Appends a fixed user message, then passes its input through.
    pub fn append_user_message<T: GraphValue>(
        &mut self,
        name: &str,
        text: impl Into<String>,
    ) -> NodeRef<T, T> {
        let text = text.into();
        self.node(name, move |ctx: AgentContext, input: T| {
            let text = text.clone();
            async move {
                ctx.session().write_session().await.append_user(text);
                Ok::<T, StrandError>(input)
            }
        })
    }

    /// Appends the input as a user message and asks the model, tools visible.
    pub fn llm_request(&mut self, name: &str) -> NodeRef<String, Message> {
        self.node(name, |ctx: AgentContext, prompt: String| async move {
            let mut session = ctx.session().write_session().await;
            session.append_user(prompt);
            let reply = session.request_llm().await;
            reply
        })
    }

    /// Like [`llm_request`](Self::llm_request), keeping every response.
    pub fn llm_request_multiple(&mut self, name: &str) -> NodeRef<String, Vec<Message>> {
        self.node(name, |ctx: AgentContext, prompt: String| async move {
            let mut session = ctx.session().write_session().await;
            session.append_user(prompt);
            let reply = session.request_llm_multiple().await;
            reply
        })
    }

    /// Like [`llm_request`](Self::llm_request), with no tools visible.
    pub fn llm_request_without_tools(&mut self, name: &str) -> NodeRef<String, Message> {
        self.node(name, |ctx: AgentContext, prompt: String| async move {
            let mut session = ctx.session().write_session().await;
            session.append_user(prompt);
            let reply = session.request_llm_without_tools().await;
            reply
        })
    }

    /// Runs one tool call through the environment.
    pub fn execute_tool(&mut self, name: &str) -> NodeRef<ToolCall, ReceivedToolResult> {
        self.node(name, |ctx: AgentContext, call: ToolCall| async move {
            ctx.execute_tool(call).await
        })
    }

    /// Runs several tool calls through the environment; results in call order.
    pub fn execute_multiple_tools(
        &mut self,
        name: &str,
    ) -> NodeRef<Vec<ToolCall>, Vec<ReceivedToolResult>> {
        self.node(name, |ctx: AgentContext, calls: Vec<ToolCall>| async move {
            ctx.execute_tools(calls).await
        })
    }

    /// Appends a tool result and asks the model again.
    pub fn llm_send_tool_result(&mut self, name: &str) -> NodeRef<ReceivedToolResult, Message> {
        self.node(name, |ctx: AgentContext, result: ReceivedToolResult| async move {
            let mut session = ctx.session().write_session().await;
            session.append(Message::tool_result(result));
            let reply = session.request_llm().await;
            reply
        })
    }

    /// Appends several tool results and asks the model, keeping every response.
    pub fn llm_send_multiple_tool_results(
        &mut self,
        name: &str,
    ) -> NodeRef<Vec<ReceivedToolResult>, Vec<Message>> {
        self.node(
            name,
            |ctx: AgentContext, results: Vec<ReceivedToolResult>| async move {
                let mut session = ctx.session().write_session().await;
                session.append_all(results.into_iter().map(Message::tool_result));
                let reply = session.request_llm_multiple().await;
                reply
            },
        )
    }

    /// Compresses the history, then passes its input through.
    pub fn compress_history<T: GraphValue>(
        &mut self,
        name: &str,
        strategy: HistoryCompression,
    ) -> NodeRef<T, T> {
        self.node(name, move |ctx: AgentContext, input: T| async move {
            ctx.session()
                .write_session()
                .await
                .compress_history(strategy)
                .await?;
            Ok::<T, StrandError>(input)
        })
    }

    /// Compresses only when the history is over the configured token budget.
    pub fn compress_history_if_over<T: GraphValue>(
        &mut self,
        name: &str,
        strategy: HistoryCompression,
    ) -> NodeRef<T, T> {
        self.node(name, move |ctx: AgentContext, input: T| async move {
            let budget = ctx.config().max_context_tokens;
            let mut session = ctx.session().write_session().await;
            let tokens = session.estimate_tokens();
            if tokens > budget {
                debug!(tokens, budget, "History over budget");
                session.compress_history(strategy).await?;
            }
            Ok::<T, StrandError>(input)
        })
    }

    /// Saves a checkpoint that resumes at `resume_at` with this node's input,
    /// then passes the input through.
    pub fn save_checkpoint<T, X>(
        &mut self,
        name: &str,
        store: Arc<CheckpointStore>,
        resume_at: &NodeRef<T, X>,
    ) -> NodeRef<T, T>
    where
        T: GraphValue + Serialize,
    {
        let node_id = resume_at.id().to_string();
        self.node(name, move |ctx: AgentContext, input: T| {
            let store = store.clone();
            let node_id = node_id.clone();
            async move {
                let iteration = ctx.state().iterations().await;
                let checkpoint = {
                    let session = ctx.session().read_session().await;
                    Checkpoint::new(
                        ctx.strategy_id(),
                        ctx.run_id().as_str(),
                        node_id,
                        &input,
                        session.messages(),
                        iteration,
                    )?
                };
                store.save(&checkpoint)?;
                debug!(run_id = %ctx.run_id(), node_id = %checkpoint.node_id, iteration, "Checkpoint saved");
                Ok::<T, StrandError>(input)
            }
        })
    }
}

/// Whether every message is a tool call.
pub fn all_tool_calls(messages: &[Message]) -> bool {
    !messages.is_empty() && messages.iter().all(|m| m.as_tool_call().is_some())
}

/// Tool calls contained in `messages`, in order.
pub fn tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    messages
        .iter()
        .filter_map(Message::as_tool_call)
        .cloned()
        .collect()
}

/// Run-scoped helper for nodes that ask the model and want plain text back.
pub async fn request_text(ctx: &AgentContext, prompt: impl Into<String>) -> Result<String> {
    let mut session = ctx.session().write_session().await;
    session.append_user(prompt);
    let reply = session.request_llm_without_tools().await?;
    Ok(reply.text().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::config::ModelConfig;
    use strand_test_utils::{AddTool, ScriptedExecutor};
    use strand_tools::ToolRegistry;

    use crate::environment::LocalEnvironment;
    use crate::graph::{ExecutionResult, Strategy};
    use crate::session::ModelSession;

    fn context(executor: Arc<ScriptedExecutor>) -> AgentContext {
        let registry = Arc::new(ToolRegistry::new().with_tool(AddTool));
        let catalog = registry.descriptors();
        let session = ModelSession::new(executor, ModelConfig::new("m"), catalog.clone());
        AgentContext::builder(Arc::new(LocalEnvironment::new(registry)), session)
            .strategy_id("calc")
            .tool_catalog(catalog)
            .build()
    }

    fn calculator() -> Strategy<String, String> {
        let mut b = GraphBuilder::<String, String>::strategy("calc");
        let ask = b.llm_request("ask");
        let call = b.execute_tool("call");
        let send = b.llm_send_tool_result("send");

        b.edge(b.start().forward_to(&ask));
        b.edge(ask.forward_to(&call).on_tool_call(|_| true));
        b.edge(
            ask.forward_to(&b.finish())
                .on_assistant_message(|_| true),
        );
        b.edge(send.forward_to(&call).on_tool_call(|_| true));
        b.edge(
            send.forward_to(&b.finish())
                .on_assistant_message(|_| true),
        );
        b.edge(call.forward_to(&send));
        b.build().unwrap()
    }

    #[tokio::test]
    async fn request_tool_and_answer() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .then_tool_call("add", json!({"a": 2, "b": 3}))
                .then_text("5"),
        );
        let ctx = context(executor.clone());
        let result = calculator().execute(&ctx, "2 + 3?".into()).await.unwrap();
        assert_eq!(result, ExecutionResult::Success("5".to_string()));

        let session = ctx.session().read_session().await;
        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].text(), Some("2 + 3?"));
        assert!(messages[1].as_tool_call().is_some());
        assert_eq!(
            messages[2].as_tool_result().and_then(|r| r.result.clone()),
            Some(json!(5))
        );
        assert_eq!(executor.requests()[1].tools, vec!["add".to_string()]);
    }

    #[tokio::test]
    async fn append_and_compress() {
        let executor = Arc::new(
            ScriptedExecutor::new().with_fallback(|_, _| vec![Message::assistant("short")]),
        );
        let mut b = GraphBuilder::<u32, u32>::strategy("notes");
        let note = b.append_user_message::<u32>("note", "remember this");
        let squash = b.compress_history::<u32>("squash", HistoryCompression::WholeHistory);
        let idle = b.do_nothing::<u32>("idle");
        b.edge(b.start().forward_to(&note));
        b.edge(note.forward_to(&squash));
        b.edge(squash.forward_to(&idle));
        b.edge(idle.forward_to(&b.finish()));
        let strategy = b.build().unwrap();

        let ctx = context(executor);
        let result = strategy.execute(&ctx, 7).await.unwrap();
        assert_eq!(result, ExecutionResult::Success(7));

        let session = ctx.session().read_session().await;
        assert_eq!(session.messages().len(), 1);
        assert!(session.messages()[0].summary);
    }

    #[tokio::test]
    async fn compress_only_over_budget() {
        let executor = Arc::new(
            ScriptedExecutor::new().with_fallback(|_, _| vec![Message::assistant("short")]),
        );
        let mut b = GraphBuilder::<u32, u32>::strategy("budget");
        let squash = b.compress_history_if_over::<u32>("squash", HistoryCompression::WholeHistory);
        b.edge(b.start().forward_to(&squash));
        b.edge(squash.forward_to(&b.finish()));
        let strategy = b.build().unwrap();

        let ctx = context(executor.clone());
        ctx.session().write_session().await.append_user("hello");
        strategy.execute(&ctx, 1).await.unwrap();
        assert_eq!(executor.request_count(), 0);
    }

    #[tokio::test]
    async fn checkpoint_records_resume_point() {
        let store = Arc::new(CheckpointStore::open_in_memory().unwrap());
        let mut b = GraphBuilder::<String, String>::strategy("calc");
        let echo = b.do_nothing::<String>("echo");
        let save = b.save_checkpoint("save", store.clone(), &echo);
        b.edge(b.start().forward_to(&save));
        b.edge(save.forward_to(&echo));
        b.edge(echo.forward_to(&b.finish()));
        let strategy = b.build().unwrap();

        let ctx = context(Arc::new(ScriptedExecutor::new()));
        strategy.execute(&ctx, "payload".into()).await.unwrap();

        let cp = store.load_latest("calc").unwrap().unwrap();
        assert_eq!(cp.node_id, "calc/echo");
        assert_eq!(cp.run_id, ctx.run_id().as_str());
        assert_eq!(cp.input_as::<String>().unwrap(), "payload");
        assert_eq!(cp.iteration, 2);
    }

    #[test]
    fn tool_call_helpers() {
        let call = ToolCall::new(None, "add", "{}");
        let messages = vec![Message::tool_call(call.clone()), Message::tool_call(call)];
        assert!(all_tool_calls(&messages));
        assert_eq!(tool_calls(&messages).len(), 2);
        assert!(!all_tool_calls(&[]));
        assert!(!all_tool_calls(&[Message::assistant("hi")]));
    }
}
