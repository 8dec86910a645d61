use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use strand_core::error::{Result, StrandError};
use strand_core::types::{ReceivedToolResult, ToolCall};

use super::{AgentEnvironment, AgentMessage, EnvironmentMessage};

/// Environment on the far side of a pair of channels.
///
/// The agent sends [`AgentMessage`]s and waits for [`EnvironmentMessage`]s.
/// Each run needs exactly one `Initialize`, ahead of any tool result; an
/// error or termination message from the environment ends the run.
/// [`AgentEnvironment::begin_run`] clears the flag for the next run.
pub struct ChannelEnvironment {
    outgoing: mpsc::Sender<AgentMessage>,
    incoming: Mutex<mpsc::Receiver<EnvironmentMessage>>,
    initialized: AtomicBool,
    terminated: AtomicBool,
}

/// The environment's ends of a [`ChannelEnvironment`].
pub struct EnvironmentHandle {
    to_agent: mpsc::Sender<EnvironmentMessage>,
    from_agent: mpsc::Receiver<AgentMessage>,
}

impl EnvironmentHandle {
    pub async fn send(&self, message: EnvironmentMessage) -> Result<()> {
        self.to_agent
            .send(message)
            .await
            .map_err(|_| StrandError::Cancelled)
    }

    /// Next message from the agent; `None` once the agent is gone.
    pub async fn recv(&mut self) -> Option<AgentMessage> {
        self.from_agent.recv().await
    }
}

impl ChannelEnvironment {
    pub fn new(buffer: usize) -> (Self, EnvironmentHandle) {
        let (outgoing, from_agent) = mpsc::channel(buffer);
        let (to_agent, incoming) = mpsc::channel(buffer);
        let env = Self {
            outgoing,
            incoming: Mutex::new(incoming),
            initialized: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        };
        (env, EnvironmentHandle { to_agent, from_agent })
    }

    /// Wait for the environment's `Initialize` message.
    pub async fn wait_for_initialization(&self) -> Result<()> {
        let message = self.next_message().await?;
        match message {
            EnvironmentMessage::Initialize => self.mark_initialized(),
            other => Err(StrandError::UnexpectedMessage(format!(
                "expected initialize, got {}",
                other.kind()
            ))),
        }
    }

    fn mark_initialized(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(StrandError::DoubleInitialization);
        }
        debug!("Environment initialized");
        Ok(())
    }

    async fn next_message(&self) -> Result<EnvironmentMessage> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| StrandError::TerminatedByClient("environment disconnected".to_string()))
    }

    /// Next message that answers a tool request.
    async fn next_reply(&self) -> Result<Vec<ReceivedToolResult>> {
        loop {
            match self.next_message().await? {
                EnvironmentMessage::Initialize => self.mark_initialized()?,
                EnvironmentMessage::ToolResult { .. } | EnvironmentMessage::ToolResults { .. }
                    if !self.initialized.load(Ordering::SeqCst) =>
                {
                    return Err(StrandError::UnexpectedMessage(
                        "tool result before initialize".to_string(),
                    ));
                }
                EnvironmentMessage::ToolResult { result } => return Ok(vec![result]),
                EnvironmentMessage::ToolResults { results } => return Ok(results),
                EnvironmentMessage::Error { message } => {
                    warn!(error = %message, "Environment reported an error");
                    return Err(StrandError::TerminatedByClient(message));
                }
                EnvironmentMessage::Termination { error, .. } => {
                    return Err(StrandError::TerminatedByClient(
                        error.unwrap_or_else(|| "terminated by environment".to_string()),
                    ));
                }
            }
        }
    }

    async fn send(&self, message: AgentMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| StrandError::TerminatedByClient("environment disconnected".to_string()))
    }
}

/// Put `results` in the order of `calls`.
///
/// Results are matched by id. The tool name is used only when the call or
/// the result carries no id.
fn order_results(
    calls: &[ToolCall],
    mut results: Vec<ReceivedToolResult>,
) -> Result<Vec<ReceivedToolResult>> {
    if results.len() != calls.len() {
        return Err(StrandError::UnexpectedMessage(format!(
            "expected {} tool results, got {}",
            calls.len(),
            results.len()
        )));
    }
    let mut ordered = Vec::with_capacity(calls.len());
    for call in calls {
        let position = match &call.id {
            Some(id) => results
                .iter()
                .position(|r| r.id.as_ref() == Some(id))
                .or_else(|| {
                    results
                        .iter()
                        .position(|r| r.id.is_none() && r.tool == call.tool)
                }),
            None => results.iter().position(|r| r.tool == call.tool),
        }
        .ok_or_else(|| {
            StrandError::UnexpectedMessage(format!(
                "no result for tool call {} ({})",
                call.tool,
                call.id.as_deref().unwrap_or("no id")
            ))
        })?;
        ordered.push(results.remove(position));
    }
    Ok(ordered)
}

impl AgentEnvironment for ChannelEnvironment {
    fn begin_run(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.terminated.store(false, Ordering::SeqCst);
    }

    fn execute_tools(&self, calls: Vec<ToolCall>) -> BoxFuture<'_, Result<Vec<ReceivedToolResult>>> {
        Box::pin(async move {
            self.send(AgentMessage::ToolCalls {
                calls: calls.clone(),
            })
            .await?;
            let results = self.next_reply().await?;
            order_results(&calls, results)
        })
    }

    fn report_problem<'a>(&'a self, error: &'a StrandError) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.send(AgentMessage::Problem {
                message: error.to_string(),
            })
            .await
        })
    }

    fn send_termination(&self, result: Option<serde_json::Value>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.terminated.swap(true, Ordering::SeqCst) {
                return Err(StrandError::TerminationAlreadySent);
            }
            self.send(AgentMessage::Termination { result }).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, tool: &str) -> ToolCall {
        ToolCall::new(Some(id.to_string()), tool, "{}")
    }

    fn ok(call: &ToolCall, content: &str) -> ReceivedToolResult {
        ReceivedToolResult::success(call, content, json!(content))
    }

    #[tokio::test]
    async fn initialize_then_results_reordered() {
        let (env, mut handle) = ChannelEnvironment::new(8);
        handle.send(EnvironmentMessage::Initialize).await.unwrap();
        env.wait_for_initialization().await.unwrap();

        let calls = vec![call("a", "echo"), call("b", "add")];
        let (first, second) = (calls[0].clone(), calls[1].clone());
        let responder = tokio::spawn(async move {
            match handle.recv().await {
                Some(AgentMessage::ToolCalls { calls }) => assert_eq!(calls.len(), 2),
                other => panic!("unexpected: {:?}", other),
            }
            handle
                .send(EnvironmentMessage::ToolResults {
                    results: vec![ok(&second, "2"), ok(&first, "1")],
                })
                .await
                .unwrap();
            handle
        });

        let results = env.execute_tools(calls).await.unwrap();
        assert_eq!(results[0].content, "1");
        assert_eq!(results[1].content, "2");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn second_initialize_is_a_protocol_violation() {
        let (env, handle) = ChannelEnvironment::new(8);
        handle.send(EnvironmentMessage::Initialize).await.unwrap();
        handle.send(EnvironmentMessage::Initialize).await.unwrap();
        env.wait_for_initialization().await.unwrap();

        let err = env.execute_tools(vec![call("a", "echo")]).await.unwrap_err();
        assert!(matches!(err, StrandError::DoubleInitialization));
    }

    #[tokio::test]
    async fn first_message_must_be_initialize() {
        let (env, handle) = ChannelEnvironment::new(8);
        handle
            .send(EnvironmentMessage::Error {
                message: "early".into(),
            })
            .await
            .unwrap();
        let err = env.wait_for_initialization().await.unwrap_err();
        assert!(matches!(err, StrandError::UnexpectedMessage(_)));
    }

    #[tokio::test]
    async fn tool_result_before_initialize_is_rejected() {
        let (env, handle) = ChannelEnvironment::new(8);
        let c = call("a", "echo");
        handle
            .send(EnvironmentMessage::ToolResult { result: ok(&c, "1") })
            .await
            .unwrap();
        let err = env.execute_tools(vec![c]).await.unwrap_err();
        assert!(matches!(err, StrandError::UnexpectedMessage(m) if m.contains("initialize")));
    }

    #[tokio::test]
    async fn each_run_needs_its_own_initialize() {
        let (env, handle) = ChannelEnvironment::new(8);
        let c = call("a", "echo");
        handle.send(EnvironmentMessage::Initialize).await.unwrap();
        handle
            .send(EnvironmentMessage::ToolResult { result: ok(&c, "1") })
            .await
            .unwrap();
        env.begin_run();
        assert_eq!(env.execute_tools(vec![c.clone()]).await.unwrap()[0].content, "1");

        env.begin_run();
        handle
            .send(EnvironmentMessage::ToolResult { result: ok(&c, "2") })
            .await
            .unwrap();
        let err = env.execute_tools(vec![c]).await.unwrap_err();
        assert!(matches!(err, StrandError::UnexpectedMessage(_)));
    }

    #[tokio::test]
    async fn error_and_termination_end_the_run() {
        let (env, handle) = ChannelEnvironment::new(8);
        handle
            .send(EnvironmentMessage::Error {
                message: "client gave up".into(),
            })
            .await
            .unwrap();
        let err = env.execute_tools(vec![call("a", "echo")]).await.unwrap_err();
        assert!(matches!(err, StrandError::TerminatedByClient(m) if m == "client gave up"));

        handle
            .send(EnvironmentMessage::Termination {
                result: None,
                error: None,
            })
            .await
            .unwrap();
        let err = env.execute_tools(vec![call("b", "echo")]).await.unwrap_err();
        assert!(matches!(err, StrandError::TerminatedByClient(_)));
    }

    #[tokio::test]
    async fn termination_is_sent_once() {
        let (env, mut handle) = ChannelEnvironment::new(8);
        env.send_termination(Some(json!(1))).await.unwrap();
        assert!(matches!(
            env.send_termination(None).await,
            Err(StrandError::TerminationAlreadySent)
        ));
        assert_eq!(
            handle.recv().await,
            Some(AgentMessage::Termination {
                result: Some(json!(1))
            })
        );
    }

    #[test]
    fn results_with_foreign_ids_are_rejected() {
        let calls = vec![call("a", "echo"), call("b", "echo")];
        let stray = ok(&call("x", "echo"), "x");
        let err = order_results(&calls, vec![stray, ok(&calls[1], "b")]).unwrap_err();
        assert!(matches!(err, StrandError::UnexpectedMessage(m) if m.contains("(a)")));
    }

    #[test]
    fn results_without_ids_match_by_tool() {
        let calls = vec![call("a", "echo"), ToolCall::new(None, "add", "{}")];
        let anonymous = ReceivedToolResult::success(&ToolCall::new(None, "echo", "{}"), "e", json!("e"));
        let ordered = order_results(&calls, vec![ok(&calls[1], "sum"), anonymous]).unwrap();
        assert_eq!(ordered[0].content, "e");
        assert_eq!(ordered[1].content, "sum");
    }

    #[test]
    fn mismatched_result_count_is_unexpected() {
        let calls = vec![call("a", "echo")];
        let err = order_results(&calls, vec![]).unwrap_err();
        assert!(matches!(err, StrandError::UnexpectedMessage(_)));
    }
}
