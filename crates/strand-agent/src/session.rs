use std::sync::{Arc, OnceLock};

use tiktoken_rs::CoreBPE;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use strand_core::config::{ModelConfig, ToolFormatting};
use strand_core::error::{Result, StrandError};
use strand_core::tool::ToolDescriptor;
use strand_core::traits::PromptExecutor;
use strand_core::types::{Message, MessageContent, Role, RunId};

use crate::pipeline::FeaturePipeline;

struct SessionState {
    messages: Vec<Message>,
    tools: Vec<ToolDescriptor>,
    model: ModelConfig,
}

/// Guarded conversation history and model parameters.
///
/// Any number of [`ReadSession`]s may be held at once; a [`WriteSession`] is
/// exclusive. Both release the lock when dropped. Cloning shares the same
/// history.
#[derive(Clone)]
pub struct ModelSession {
    state: Arc<RwLock<SessionState>>,
    executor: Arc<dyn PromptExecutor>,
    pipeline: Arc<FeaturePipeline>,
    run_id: RunId,
    formatting: ToolFormatting,
}

impl ModelSession {
    pub fn new(
        executor: Arc<dyn PromptExecutor>,
        model: ModelConfig,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState {
                messages: Vec::new(),
                tools,
                model,
            })),
            executor,
            pipeline: Arc::new(FeaturePipeline::default()),
            run_id: RunId::new(),
            formatting: ToolFormatting::default(),
        }
    }

    /// Attach the run this session belongs to.
    pub(crate) fn for_run(
        mut self,
        run_id: RunId,
        pipeline: Arc<FeaturePipeline>,
        formatting: ToolFormatting,
    ) -> Self {
        self.run_id = run_id;
        self.pipeline = pipeline;
        self.formatting = formatting;
        self
    }

    /// Shared read access. Waits while a writer holds the session.
    pub async fn read_session(&self) -> ReadSession<'_> {
        ReadSession {
            state: self.state.read().await,
        }
    }

    /// Exclusive write access. Waits for every reader and writer to finish.
    pub async fn write_session(&self) -> WriteSession<'_> {
        WriteSession {
            state: self.state.write().await,
            session: self,
        }
    }

    /// Independent session starting from the current history, exposing `tools`.
    pub(crate) async fn narrowed(&self, tools: Vec<ToolDescriptor>) -> Self {
        let state = self.state.read().await;
        Self {
            state: Arc::new(RwLock::new(SessionState {
                messages: state.messages.clone(),
                tools,
                model: state.model.clone(),
            })),
            executor: self.executor.clone(),
            pipeline: self.pipeline.clone(),
            run_id: self.run_id.clone(),
            formatting: self.formatting,
        }
    }

    /// Take over the history and model of a narrowed copy. Tools stay as they are.
    pub(crate) async fn absorb(&self, other: &ModelSession) {
        if Arc::ptr_eq(&self.state, &other.state) {
            return;
        }
        let (messages, model) = {
            let other = other.state.read().await;
            (other.messages.clone(), other.model.clone())
        };
        let mut state = self.state.write().await;
        state.messages = messages;
        state.model = model;
    }
}

/// Shared view of a session.
pub struct ReadSession<'a> {
    state: RwLockReadGuard<'a, SessionState>,
}

impl ReadSession<'_> {
    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.state.messages.last()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.state.tools
    }

    pub fn model(&self) -> &ModelConfig {
        &self.state.model
    }

    pub fn estimate_tokens(&self) -> usize {
        estimate_history_tokens(&self.state.messages)
    }
}

/// Exclusive view of a session.
pub struct WriteSession<'a> {
    state: RwLockWriteGuard<'a, SessionState>,
    session: &'a ModelSession,
}

impl WriteSession<'_> {
    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.state.tools
    }

    pub fn model(&self) -> &ModelConfig {
        &self.state.model
    }

    pub fn estimate_tokens(&self) -> usize {
        estimate_history_tokens(&self.state.messages)
    }

    pub fn append(&mut self, message: Message) {
        self.state.messages.push(message);
    }

    pub fn append_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.state.messages.extend(messages);
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.append(Message::user(text));
    }

    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.state.messages = messages;
    }

    pub fn set_tools(&mut self, tools: Vec<ToolDescriptor>) {
        self.state.tools = tools;
    }

    pub fn set_model(&mut self, model: ModelConfig) {
        self.state.model = model;
    }

    /// Ask the model with the visible tools. The first response is appended
    /// to the history and returned.
    pub async fn request_llm(&mut self) -> Result<Message> {
        let tools = self.state.tools.clone();
        self.request_first(&tools).await
    }

    /// Ask the model with no tools visible.
    pub async fn request_llm_without_tools(&mut self) -> Result<Message> {
        self.request_first(&[]).await
    }

    /// Ask the model with the visible tools, appending every response.
    pub async fn request_llm_multiple(&mut self) -> Result<Vec<Message>> {
        let tools = self.state.tools.clone();
        let responses = self.send(&self.state.messages.clone(), &tools).await?;
        self.state.messages.extend(responses.iter().cloned());
        Ok(responses)
    }

    async fn request_first(&mut self, tools: &[ToolDescriptor]) -> Result<Message> {
        let responses = self.send(&self.state.messages.clone(), tools).await?;
        let first = responses
            .into_iter()
            .next()
            .ok_or_else(|| StrandError::Llm("model returned no messages".to_string()))?;
        self.state.messages.push(first.clone());
        Ok(first)
    }

    /// One model request over `history`. Nothing is appended.
    pub(crate) async fn send(
        &self,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Vec<Message>> {
        let prompt = format_prompt(history, tools, self.session.formatting);
        let run_id = &self.session.run_id;
        self.session.pipeline.before_llm_call(run_id, &prompt, tools);
        debug!(run_id = %run_id, messages = prompt.len(), tools = tools.len(), "Requesting model");

        let responses = self
            .session
            .executor
            .execute(&self.state.model, prompt, tools)
            .await?;
        if responses.is_empty() {
            return Err(StrandError::Llm("model returned no messages".to_string()));
        }
        self.session
            .pipeline
            .after_llm_call(run_id, &responses, !tools.is_empty());
        Ok(responses)
    }
}

/// Rewrite tool messages the model should see as plain text.
///
/// With `Missing`, only messages about tools outside `visible` are rewritten;
/// with `All`, every tool call and result is.
fn format_prompt(
    history: &[Message],
    visible: &[ToolDescriptor],
    policy: ToolFormatting,
) -> Vec<Message> {
    history
        .iter()
        .map(|message| {
            let Some(tool) = message.tool_name() else {
                return message.clone();
            };
            let hidden = match policy {
                ToolFormatting::All => true,
                ToolFormatting::Missing => !visible.iter().any(|t| t.name == tool),
            };
            if !hidden {
                return message.clone();
            }
            let role = match message.content {
                MessageContent::ToolResult { .. } => Role::User,
                _ => Role::Assistant,
            };
            Message {
                role,
                content: MessageContent::Text {
                    text: message.render(),
                },
                timestamp: message.timestamp,
                summary: message.summary,
            }
        })
        .collect()
}

/// Tokenizer for cl100k_base, or `None` if it failed to load.
fn tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER
        .get_or_init(|| tiktoken_rs::cl100k_base().ok())
        .as_ref()
}

pub fn estimate_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len() / 4,
    }
}

/// Content tokens plus 4 tokens of per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let content = serde_json::to_string(&message.content).unwrap_or_default();
    estimate_tokens(&content) + 4
}

fn estimate_history_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strand_core::types::{ReceivedToolResult, ToolCall};
    use strand_test_utils::ScriptedExecutor;

    fn session(executor: ScriptedExecutor, tools: Vec<ToolDescriptor>) -> ModelSession {
        ModelSession::new(Arc::new(executor), ModelConfig::new("test-model"), tools)
    }

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, "test tool")
    }

    #[tokio::test]
    async fn request_llm_appends_first_response_only() {
        let executor = ScriptedExecutor::new()
            .then(vec![Message::assistant("one"), Message::assistant("two")]);
        let session = session(executor, vec![]);
        {
            let mut w = session.write_session().await;
            w.append_user("hi");
            let reply = w.request_llm().await.unwrap();
            assert_eq!(reply.text(), Some("one"));
        }
        let r = session.read_session().await;
        assert_eq!(r.messages().len(), 2);
        assert_eq!(r.last_message().and_then(|m| m.text()), Some("one"));
    }

    #[tokio::test]
    async fn request_llm_multiple_appends_everything() {
        let executor = ScriptedExecutor::new()
            .then(vec![Message::assistant("one"), Message::assistant("two")]);
        let session = session(executor, vec![]);
        let mut w = session.write_session().await;
        let replies = w.request_llm_multiple().await.unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(w.messages().len(), 2);
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let session = session(ScriptedExecutor::new().then(vec![]), vec![]);
        let err = session.write_session().await.request_llm().await.unwrap_err();
        assert!(matches!(err, StrandError::Llm(_)));
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let session = session(ScriptedExecutor::new(), vec![]);
        let writer = session.write_session().await;

        let reader_session = session.clone();
        let reader = tokio::spawn(async move {
            reader_session.read_session().await.messages().len()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        drop(writer);
        assert_eq!(reader.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readers_share_access() {
        let session = session(ScriptedExecutor::new(), vec![]);
        let first = session.read_session().await;
        let second = session.read_session().await;
        assert_eq!(first.messages().len(), second.messages().len());
    }

    #[test]
    fn missing_policy_rewrites_only_hidden_tools() {
        let call = ToolCall::new(Some("1".into()), "hidden", "{}");
        let visible_call = ToolCall::new(Some("2".into()), "shown", "{}");
        let history = vec![
            Message::user("go"),
            Message::tool_call(call.clone()),
            Message::tool_result(ReceivedToolResult::failure(&call, "nope")),
            Message::tool_call(visible_call),
        ];

        let prompt = format_prompt(&history, &[tool("shown")], ToolFormatting::Missing);
        assert_eq!(prompt[0], history[0]);
        assert!(prompt[1].text().unwrap().contains("hidden"));
        assert_eq!(prompt[2].role, Role::User);
        assert!(prompt[3].as_tool_call().is_some());

        let all = format_prompt(&history, &[tool("shown")], ToolFormatting::All);
        assert!(all[1..].iter().all(|m| m.text().is_some()));
    }

    #[tokio::test]
    async fn requests_see_formatted_history() {
        let executor = Arc::new(ScriptedExecutor::new().then_text("ok"));
        let session = ModelSession::new(executor.clone(), ModelConfig::new("m"), vec![]);
        let mut w = session.write_session().await;
        w.append(Message::tool_call(ToolCall::new(None, "gone", "{}")));
        w.request_llm().await.unwrap();

        let sent = &executor.requests()[0];
        assert!(sent.messages[0].text().is_some());
        assert!(sent.tools.is_empty());
        // History itself keeps the structured message.
        assert!(w.messages()[0].as_tool_call().is_some());
    }

    #[tokio::test]
    async fn narrowed_copy_is_merged_back() {
        let session = session(ScriptedExecutor::new(), vec![tool("a"), tool("b")]);
        session.write_session().await.append_user("before");

        let narrowed = session.narrowed(vec![tool("a")]).await;
        {
            let mut w = narrowed.write_session().await;
            assert_eq!(w.tools().len(), 1);
            w.append_user("inside");
            w.set_model(ModelConfig::new("other"));
        }
        assert_eq!(session.read_session().await.messages().len(), 1);

        session.absorb(&narrowed).await;
        let r = session.read_session().await;
        assert_eq!(r.messages().len(), 2);
        assert_eq!(r.model().model_id, "other");
        assert_eq!(r.tools().len(), 2);
    }

    #[test]
    fn token_estimates_grow_with_content() {
        let short = estimate_message_tokens(&Message::user("hi"));
        let long = estimate_message_tokens(&Message::user("hi ".repeat(100)));
        assert!(short >= 5);
        assert!(long > short);
    }
}
