use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use strand_core::error::{Result, StrandError};
use strand_core::types::{ReceivedToolResult, ToolCall};
use strand_tools::ToolRegistry;

use super::AgentEnvironment;

#[derive(Default)]
struct Outcome {
    problems: Vec<String>,
    termination: Option<Option<serde_json::Value>>,
}

/// In-process environment backed by a [`ToolRegistry`].
///
/// Tool failures of any kind (bad arguments, unknown tool, timeout, runtime
/// error) come back as results without a structured payload.
pub struct LocalEnvironment {
    registry: Arc<ToolRegistry>,
    parallel: bool,
    outcome: Mutex<Outcome>,
}

impl LocalEnvironment {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            parallel: true,
            outcome: Mutex::new(Outcome::default()),
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Problems reported during the current run.
    pub fn problems(&self) -> Vec<String> {
        self.lock().problems.clone()
    }

    /// The termination result, once the run has sent one.
    pub fn termination(&self) -> Option<Option<serde_json::Value>> {
        self.lock().termination.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn execute_one(&self, call: ToolCall) -> ReceivedToolResult {
        let args = match call.args_json() {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.tool, error = %e, "Rejected tool arguments");
                return ReceivedToolResult::failure(&call, e.to_string());
            }
        };
        match self.registry.execute(&call.tool, args).await {
            Ok(output) => ReceivedToolResult::success(&call, output.content, output.result),
            Err(e) => {
                error!(tool = %call.tool, error = %e, "Tool execution failed");
                ReceivedToolResult::failure(&call, e.to_string())
            }
        }
    }
}

impl AgentEnvironment for LocalEnvironment {
    fn begin_run(&self) {
        *self.lock() = Outcome::default();
    }

    fn execute_tools(&self, calls: Vec<ToolCall>) -> BoxFuture<'_, Result<Vec<ReceivedToolResult>>> {
        Box::pin(async move {
            debug!(count = calls.len(), parallel = self.parallel, "Executing tool calls");
            if self.parallel && calls.len() > 1 {
                let futs: Vec<_> = calls.into_iter().map(|c| self.execute_one(c)).collect();
                Ok(futures::future::join_all(futs).await)
            } else {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(self.execute_one(call).await);
                }
                Ok(results)
            }
        })
    }

    fn report_problem<'a>(&'a self, error: &'a StrandError) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            warn!(error = %error, "Run reported a problem");
            self.lock().problems.push(error.to_string());
            Ok(())
        })
    }

    fn send_termination(&self, result: Option<serde_json::Value>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut outcome = self.lock();
            if outcome.termination.is_some() {
                return Err(StrandError::TerminationAlreadySent);
            }
            debug!(has_result = result.is_some(), "Run terminated");
            outcome.termination = Some(result);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_test_utils::{AddTool, EchoTool, FailingTool, SlowTool};

    fn env() -> LocalEnvironment {
        let registry = ToolRegistry::new()
            .with_tool(AddTool)
            .with_tool(EchoTool)
            .with_tool(FailingTool)
            .with_tool(SlowTool);
        LocalEnvironment::new(Arc::new(registry))
    }

    fn call(id: &str, tool: &str, args: &str) -> ToolCall {
        ToolCall::new(Some(id.to_string()), tool, args)
    }

    #[tokio::test]
    async fn results_follow_call_order() {
        let env = env();
        let results = env
            .execute_tools(vec![
                call("1", "add", r#"{"a": 1, "b": 2}"#),
                call("2", "echo", r#"{"text": "hi"}"#),
            ])
            .await
            .unwrap();
        assert_eq!(results[0].id.as_deref(), Some("1"));
        assert_eq!(results[0].result, Some(json!(3)));
        assert_eq!(results[1].content, "hi");
    }

    #[tokio::test]
    async fn failures_have_no_payload() {
        let env = env().with_parallel(false);
        let results = env
            .execute_tools(vec![
                call("1", "add", "not json"),
                call("2", "add", r#"{"a": "x"}"#),
                call("3", "ghost", "{}"),
                call("4", "fail", "{}"),
            ])
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.result.is_none()));
        assert!(results[2].content.contains("ghost"));
        assert!(results[3].content.contains("intentional failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_failed_result() {
        let env = env();
        let results = env.execute_tools(vec![call("1", "slow", "")]).await.unwrap();
        assert!(results[0].result.is_none());
        assert!(results[0].content.contains("timeout"));
    }

    #[tokio::test]
    async fn termination_only_once() {
        let env = env();
        env.send_termination(Some(json!("done"))).await.unwrap();
        let err = env.send_termination(None).await.unwrap_err();
        assert!(matches!(err, StrandError::TerminationAlreadySent));
        assert_eq!(env.termination(), Some(Some(json!("done"))));
    }

    #[tokio::test]
    async fn begin_run_clears_the_previous_outcome() {
        let env = env();
        env.report_problem(&StrandError::Llm("down".into()))
            .await
            .unwrap();
        env.send_termination(Some(json!(1))).await.unwrap();

        env.begin_run();
        assert!(env.problems().is_empty());
        assert_eq!(env.termination(), None);
        env.send_termination(Some(json!(2))).await.unwrap();
        assert_eq!(env.termination(), Some(Some(json!(2))));
    }

    #[tokio::test]
    async fn problems_are_recorded() {
        let env = env();
        env.report_problem(&StrandError::Llm("down".into()))
            .await
            .unwrap();
        assert_eq!(env.problems().len(), 1);
        assert!(env.termination().is_none());
    }
}
