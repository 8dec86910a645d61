use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use strand_core::config::AgentConfig;
use strand_core::error::{Result, StrandError};
use strand_core::tool::ToolDescriptor;
use strand_core::types::{ReceivedToolResult, RunId, ToolCall};

use crate::environment::AgentEnvironment;
use crate::graph::{downcast, erase, GraphValue, Value};
use crate::pipeline::FeaturePipeline;
use crate::session::ModelSession;
use crate::state::AgentStateManager;
use crate::storage::AgentStorage;

/// Everything a node can reach during a run.
///
/// Cloning is cheap and shares every part. A subgraph with its own tool
/// scope gets a copy whose session is a separate, narrowed one.
#[derive(Clone)]
pub struct AgentContext {
    environment: Arc<dyn AgentEnvironment>,
    agent_input: Value,
    config: Arc<AgentConfig>,
    session: ModelSession,
    state: Arc<AgentStateManager>,
    storage: Arc<AgentStorage>,
    run_id: RunId,
    strategy_id: String,
    pipeline: Arc<FeaturePipeline>,
    tool_catalog: Arc<Vec<ToolDescriptor>>,
    cancel: CancellationToken,
}

impl AgentContext {
    pub fn builder(
        environment: Arc<dyn AgentEnvironment>,
        session: ModelSession,
    ) -> AgentContextBuilder {
        AgentContextBuilder {
            environment,
            session,
            agent_input: erase(()),
            config: AgentConfig::default(),
            run_id: RunId::new(),
            strategy_id: String::new(),
            pipeline: Arc::new(FeaturePipeline::default()),
            tool_catalog: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn environment(&self) -> &Arc<dyn AgentEnvironment> {
        &self.environment
    }

    /// The run's original input, if it has type `T`.
    pub fn agent_input<T: GraphValue>(&self) -> Option<T> {
        downcast(self.agent_input.clone())
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session(&self) -> &ModelSession {
        &self.session
    }

    pub fn state(&self) -> &AgentStateManager {
        &self.state
    }

    pub fn storage(&self) -> &AgentStorage {
        &self.storage
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    /// Every tool the run was given, regardless of the current scope.
    pub fn tool_catalog(&self) -> &[ToolDescriptor] {
        &self.tool_catalog
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Copy of this context whose session exposes only `tools`.
    pub async fn with_tools(&self, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            session: self.session.narrowed(tools).await,
            ..self.clone()
        }
    }

    /// Copy of this context using `session`.
    pub fn with_session(&self, session: ModelSession) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    /// Force the node the run continues from, with its input.
    ///
    /// `node_id` must be fully qualified. Only one point may be set per run.
    pub async fn set_execution_point<T: GraphValue>(&self, node_id: &str, input: T) -> Result<()> {
        self.state.set_execution_point(node_id, erase(input)).await
    }

    pub async fn execute_tool(&self, call: ToolCall) -> Result<ReceivedToolResult> {
        let mut results = self.execute_tools(vec![call]).await?;
        results
            .pop()
            .ok_or_else(|| StrandError::UnexpectedMessage("no result for tool call".to_string()))
    }

    /// Dispatch `calls` through the environment, results in call order.
    ///
    /// Cancellation wins over a pending dispatch.
    pub async fn execute_tools(&self, calls: Vec<ToolCall>) -> Result<Vec<ReceivedToolResult>> {
        for call in &calls {
            self.pipeline.before_tool_call(&self.run_id, call);
        }
        debug!(run_id = %self.run_id, count = calls.len(), "Dispatching tool calls");

        let results = tokio::select! {
            results = self.environment.execute_tools(calls) => results?,
            _ = self.cancel.cancelled() => return Err(StrandError::Cancelled),
        };

        for result in &results {
            self.pipeline.after_tool_call(&self.run_id, result);
        }
        Ok(results)
    }
}

/// Assembles an [`AgentContext`] for one run.
pub struct AgentContextBuilder {
    environment: Arc<dyn AgentEnvironment>,
    session: ModelSession,
    agent_input: Value,
    config: AgentConfig,
    run_id: RunId,
    strategy_id: String,
    pipeline: Arc<FeaturePipeline>,
    tool_catalog: Vec<ToolDescriptor>,
    cancel: CancellationToken,
}

impl AgentContextBuilder {
    pub fn agent_input<T: GraphValue>(mut self, input: T) -> Self {
        self.agent_input = erase(input);
        self
    }

    pub(crate) fn agent_input_value(mut self, input: Value) -> Self {
        self.agent_input = input;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn strategy_id(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<FeaturePipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn tool_catalog(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tool_catalog = tools;
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> AgentContext {
        let session = self.session.for_run(
            self.run_id.clone(),
            self.pipeline.clone(),
            self.config.tool_formatting,
        );
        AgentContext {
            environment: self.environment,
            agent_input: self.agent_input,
            state: Arc::new(AgentStateManager::new(self.config.max_iterations)),
            config: Arc::new(self.config),
            session,
            storage: Arc::new(AgentStorage::new()),
            run_id: self.run_id,
            strategy_id: self.strategy_id,
            pipeline: self.pipeline,
            tool_catalog: Arc::new(self.tool_catalog),
            cancel: self.cancel,
        }
    }
}
