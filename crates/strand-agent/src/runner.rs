use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use strand_core::config::{AgentConfig, ModelConfig};
use strand_core::error::{Result, StrandError};
use strand_core::traits::PromptExecutor;
use strand_core::types::{Message, RunId};
use strand_tools::ToolRegistry;

use crate::checkpoint::Checkpoint;
use crate::context::AgentContext;
use crate::environment::{AgentEnvironment, LocalEnvironment};
use crate::graph::{erase, ExecutionResult, GraphValue, Strategy, Value};
use crate::pipeline::FeaturePipeline;
use crate::session::ModelSession;

/// What an [`ErrorHandler`] made of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The run ends as `Interrupted` with the error's text.
    Handled,
    /// The error is reported to the environment and returned.
    Unhandled,
}

/// Decides the fate of errors escaping a node.
///
/// Engine conditions (stuck, iteration ceiling, protocol violations) never
/// reach the handler.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &AgentContext, error: &StrandError) -> ErrorDisposition;
}

impl<F> ErrorHandler for F
where
    F: Fn(&AgentContext, &StrandError) -> ErrorDisposition + Send + Sync + 'static,
{
    fn handle(&self, ctx: &AgentContext, error: &StrandError) -> ErrorDisposition {
        self(ctx, error)
    }
}

/// Drives a strategy: one run at a time, from context creation to the
/// environment's termination signal.
pub struct AgentRunner<I, O> {
    strategy: Strategy<I, O>,
    executor: Arc<dyn PromptExecutor>,
    registry: Arc<ToolRegistry>,
    environment: Option<Arc<dyn AgentEnvironment>>,
    config: AgentConfig,
    model: ModelConfig,
    pipeline: Arc<FeaturePipeline>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    running: AtomicBool,
    cancel: CancellationToken,
}

/// Clears the running flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where a run begins.
struct RunStart {
    run_id: RunId,
    agent_input: Value,
    input: Value,
    history: Option<Vec<Message>>,
    point: Option<(String, Value)>,
}

impl<I: GraphValue, O: GraphValue + Serialize> AgentRunner<I, O> {
    pub fn builder(
        strategy: Strategy<I, O>,
        executor: Arc<dyn PromptExecutor>,
    ) -> AgentRunnerBuilder<I, O> {
        AgentRunnerBuilder {
            strategy,
            executor,
            registry: Arc::new(ToolRegistry::new()),
            environment: None,
            config: AgentConfig::default(),
            model: ModelConfig::default(),
            pipeline: FeaturePipeline::default(),
            error_handler: None,
        }
    }

    pub fn strategy(&self) -> &Strategy<I, O> {
        &self.strategy
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cancelling this token interrupts the current run and every later one.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the strategy on `input`.
    pub async fn run(&self, input: I) -> Result<ExecutionResult<O>> {
        let input = erase(input);
        self.drive(RunStart {
            run_id: RunId::new(),
            agent_input: input.clone(),
            input,
            history: None,
            point: None,
        })
        .await
    }

    /// Continue a run from a checkpoint.
    ///
    /// The saved history replaces the session's, and the run starts at the
    /// checkpoint's node with the saved input decoded as `T`.
    pub async fn resume<T: GraphValue + DeserializeOwned>(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<ExecutionResult<O>> {
        if !self.strategy.contains(&checkpoint.node_id) {
            return Err(StrandError::NodeNotFound(checkpoint.node_id.clone()));
        }
        let input: T = checkpoint.input_as()?;
        info!(
            run_id = %checkpoint.run_id,
            node_id = %checkpoint.node_id,
            iteration = checkpoint.iteration,
            "Resuming from checkpoint"
        );
        self.drive(RunStart {
            run_id: RunId::from_str(&checkpoint.run_id),
            agent_input: erase(()),
            input: erase(()),
            history: Some(checkpoint.messages()?),
            point: Some((checkpoint.node_id.clone(), erase(input))),
        })
        .await
    }

    async fn drive(&self, start: RunStart) -> Result<ExecutionResult<O>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StrandError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let environment: Arc<dyn AgentEnvironment> = match &self.environment {
            Some(env) => env.clone(),
            None => Arc::new(
                LocalEnvironment::new(self.registry.clone())
                    .with_parallel(self.config.parallel_tools),
            ),
        };
        environment.begin_run();

        let catalog = self.registry.descriptors();
        let session = ModelSession::new(self.executor.clone(), self.model.clone(), catalog.clone());
        {
            let mut w = session.write_session().await;
            match start.history {
                Some(history) => w.set_messages(history),
                None => {
                    if let Some(prompt) = &self.config.system_prompt {
                        w.append(Message::system(prompt.clone()));
                    }
                }
            }
        }

        let ctx = AgentContext::builder(environment.clone(), session)
            .agent_input_value(start.agent_input)
            .config(self.config.clone())
            .run_id(start.run_id.clone())
            .strategy_id(self.strategy.name())
            .pipeline(self.pipeline.clone())
            .tool_catalog(catalog)
            .cancellation_token(self.cancel.child_token())
            .build();

        let run_id = start.run_id;
        let strategy = self.strategy.name();
        self.pipeline.run_created(&run_id, strategy);
        if let Some((node_id, input)) = start.point {
            ctx.state().set_execution_point(node_id, input).await?;
        }
        self.pipeline.run_started(&run_id, strategy);
        info!(run_id = %run_id, strategy, "Run started");

        match self.strategy.execute_value(&ctx, start.input).await {
            Ok(ExecutionResult::Success(output)) => {
                let sent = environment
                    .send_termination(serde_json::to_value(&output).ok())
                    .await;
                if let Err(e) = sent {
                    return Err(self.fail(environment.as_ref(), &run_id, e).await);
                }
                self.pipeline.run_finished(&run_id, strategy, false);
                info!(run_id = %run_id, iterations = ctx.state().iterations().await, "Run finished");
                Ok(ExecutionResult::Success(output))
            }
            Ok(ExecutionResult::Interrupted(reason)) => {
                self.pipeline.run_finished(&run_id, strategy, true);
                info!(run_id = %run_id, reason = %reason, "Run interrupted");
                Ok(ExecutionResult::Interrupted(reason))
            }
            Err(e) => {
                let disposition = match &self.error_handler {
                    Some(handler) if !e.is_engine_fatal() => handler.handle(&ctx, &e),
                    _ => ErrorDisposition::Unhandled,
                };
                if disposition == ErrorDisposition::Handled {
                    warn!(run_id = %run_id, error = %e, "Run error handled");
                    self.pipeline.run_finished(&run_id, strategy, true);
                    return Ok(ExecutionResult::Interrupted(e.to_string()));
                }

                Err(self.fail(environment.as_ref(), &run_id, e).await)
            }
        }
    }

    /// Report a failed run to the pipeline and the environment.
    async fn fail(
        &self,
        environment: &dyn AgentEnvironment,
        run_id: &RunId,
        e: StrandError,
    ) -> StrandError {
        error!(run_id = %run_id, error = %e, "Run failed");
        self.pipeline.run_error(run_id, self.strategy.name(), &e);
        if let Err(report) = environment.report_problem(&e).await {
            warn!(run_id = %run_id, error = %report, "Failed to report problem");
        }
        e
    }
}

/// Assembles an [`AgentRunner`].
pub struct AgentRunnerBuilder<I, O> {
    strategy: Strategy<I, O>,
    executor: Arc<dyn PromptExecutor>,
    registry: Arc<ToolRegistry>,
    environment: Option<Arc<dyn AgentEnvironment>>,
    config: AgentConfig,
    model: ModelConfig,
    pipeline: FeaturePipeline,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl<I: GraphValue, O: GraphValue + Serialize> AgentRunnerBuilder<I, O> {
    /// Tools offered to the model. Without an explicit environment, calls
    /// are also executed against this registry.
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn environment(mut self, environment: Arc<dyn AgentEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn pipeline(mut self, pipeline: FeaturePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> AgentRunner<I, O> {
        AgentRunner {
            strategy: self.strategy,
            executor: self.executor,
            registry: self.registry,
            environment: self.environment,
            config: self.config,
            model: self.model,
            pipeline: Arc::new(self.pipeline),
            error_handler: self.error_handler,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_test_utils::ScriptedExecutor;

    use crate::graph::GraphBuilder;

    fn failing_strategy() -> Strategy<String, String> {
        let mut b = GraphBuilder::<String, String>::strategy("failing");
        let boom = b.node("boom", |_ctx, _input: String| async move {
            Err::<String, _>(StrandError::Node {
                node: "boom".into(),
                message: "exploded".into(),
            })
        });
        b.edge(b.start().forward_to(&boom));
        b.edge(boom.forward_to(&b.finish()));
        b.build().unwrap()
    }

    fn runner(strategy: Strategy<String, String>) -> AgentRunnerBuilder<String, String> {
        AgentRunner::builder(strategy, Arc::new(ScriptedExecutor::new()))
    }

    #[tokio::test]
    async fn unhandled_error_is_returned() {
        let runner = runner(failing_strategy()).build();
        let err = runner.run("x".into()).await.unwrap_err();
        assert!(matches!(err, StrandError::Node { .. }));
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn handled_error_interrupts() {
        let runner = runner(failing_strategy())
            .error_handler(|_: &AgentContext, e: &StrandError| match e {
                StrandError::Node { .. } => ErrorDisposition::Handled,
                _ => ErrorDisposition::Unhandled,
            })
            .build();
        let result = runner.run("x".into()).await.unwrap();
        assert!(matches!(result, ExecutionResult::Interrupted(r) if r.contains("exploded")));
    }

    /// Environment that refuses every termination.
    #[derive(Default)]
    struct Refusing {
        problems: std::sync::Mutex<Vec<String>>,
    }

    impl AgentEnvironment for Refusing {
        fn execute_tools(
            &self,
            _calls: Vec<strand_core::types::ToolCall>,
        ) -> futures::future::BoxFuture<'_, Result<Vec<strand_core::types::ReceivedToolResult>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn report_problem<'a>(
            &'a self,
            error: &'a StrandError,
        ) -> futures::future::BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.problems.lock().unwrap().push(error.to_string());
                Ok(())
            })
        }

        fn send_termination(
            &self,
            _result: Option<serde_json::Value>,
        ) -> futures::future::BoxFuture<'_, Result<()>> {
            Box::pin(async { Err(StrandError::TerminationAlreadySent) })
        }
    }

    #[derive(Default)]
    struct Outcomes {
        finished: std::sync::Mutex<usize>,
        errors: std::sync::Mutex<Vec<String>>,
    }

    impl crate::pipeline::PipelineHandler for Arc<Outcomes> {
        fn on_run_finished(&self, _run_id: &RunId, _strategy: &str, _interrupted: bool) {
            *self.finished.lock().unwrap() += 1;
        }

        fn on_run_error(&self, _run_id: &RunId, _strategy: &str, error: &StrandError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn failed_termination_fails_the_run() {
        let mut b = GraphBuilder::<String, String>::strategy("echo");
        b.edge(b.start().forward_to(&b.finish()));
        let env = Arc::new(Refusing::default());
        let outcomes = Arc::new(Outcomes::default());
        let runner = runner(b.build().unwrap())
            .environment(env.clone())
            .pipeline(FeaturePipeline::new().with_handler(outcomes.clone()))
            .build();

        let err = runner.run("x".into()).await.unwrap_err();
        assert!(matches!(err, StrandError::TerminationAlreadySent));
        assert_eq!(env.problems.lock().unwrap().len(), 1);
        assert_eq!(outcomes.errors.lock().unwrap().len(), 1);
        assert_eq!(*outcomes.finished.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_runner_interrupts() {
        let mut b = GraphBuilder::<String, String>::strategy("echo");
        b.edge(b.start().forward_to(&b.finish()));
        let runner = runner(b.build().unwrap()).build();
        runner.cancel_token().cancel();

        let result = runner.run("x".into()).await.unwrap();
        assert_eq!(result, ExecutionResult::Interrupted("cancelled".into()));
    }
}
