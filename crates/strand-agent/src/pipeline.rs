//! Feature pipeline: observers invoked at each run transition.
//!
//! Handlers run synchronously and in registration order. Hooks must not
//! block; anything slow belongs on a channel the handler owns.

use std::sync::Arc;

use tracing::{debug, error, info};

use strand_core::error::StrandError;
use strand_core::event::EventBus;
use strand_core::tool::ToolDescriptor;
use strand_core::types::{AgentEvent, Message, ReceivedToolResult, RunId, ToolCall};

use crate::graph::{Node, Value};

/// Observer of run transitions. Every hook defaults to doing nothing.
#[allow(unused_variables)]
pub trait PipelineHandler: Send + Sync + 'static {
    fn on_run_created(&self, run_id: &RunId, strategy: &str) {}

    fn on_run_started(&self, run_id: &RunId, strategy: &str) {}

    fn on_run_finished(&self, run_id: &RunId, strategy: &str, interrupted: bool) {}

    fn on_run_error(&self, run_id: &RunId, strategy: &str, error: &StrandError) {}

    fn on_before_node(&self, run_id: &RunId, node: &Node, input: &Value) {}

    fn on_after_node(&self, run_id: &RunId, node: &Node, output: &Value) {}

    fn on_before_llm_call(&self, run_id: &RunId, prompt: &[Message], tools: &[ToolDescriptor]) {}

    fn on_after_llm_call(&self, run_id: &RunId, responses: &[Message], with_tools: bool) {}

    fn on_before_tool_call(&self, run_id: &RunId, call: &ToolCall) {}

    fn on_after_tool_call(&self, run_id: &RunId, result: &ReceivedToolResult) {}
}

/// Ordered list of handlers.
#[derive(Clone, Default)]
pub struct FeaturePipeline {
    handlers: Vec<Arc<dyn PipelineHandler>>,
}

impl FeaturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: impl PipelineHandler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn add(&mut self, handler: Arc<dyn PipelineHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn run_created(&self, run_id: &RunId, strategy: &str) {
        self.handlers
            .iter()
            .for_each(|h| h.on_run_created(run_id, strategy));
    }

    pub fn run_started(&self, run_id: &RunId, strategy: &str) {
        self.handlers
            .iter()
            .for_each(|h| h.on_run_started(run_id, strategy));
    }

    pub fn run_finished(&self, run_id: &RunId, strategy: &str, interrupted: bool) {
        self.handlers
            .iter()
            .for_each(|h| h.on_run_finished(run_id, strategy, interrupted));
    }

    pub fn run_error(&self, run_id: &RunId, strategy: &str, error: &StrandError) {
        self.handlers
            .iter()
            .for_each(|h| h.on_run_error(run_id, strategy, error));
    }

    pub fn before_node(&self, run_id: &RunId, node: &Node, input: &Value) {
        self.handlers
            .iter()
            .for_each(|h| h.on_before_node(run_id, node, input));
    }

    pub fn after_node(&self, run_id: &RunId, node: &Node, output: &Value) {
        self.handlers
            .iter()
            .for_each(|h| h.on_after_node(run_id, node, output));
    }

    pub fn before_llm_call(&self, run_id: &RunId, prompt: &[Message], tools: &[ToolDescriptor]) {
        self.handlers
            .iter()
            .for_each(|h| h.on_before_llm_call(run_id, prompt, tools));
    }

    pub fn after_llm_call(&self, run_id: &RunId, responses: &[Message], with_tools: bool) {
        self.handlers
            .iter()
            .for_each(|h| h.on_after_llm_call(run_id, responses, with_tools));
    }

    pub fn before_tool_call(&self, run_id: &RunId, call: &ToolCall) {
        self.handlers
            .iter()
            .for_each(|h| h.on_before_tool_call(run_id, call));
    }

    pub fn after_tool_call(&self, run_id: &RunId, result: &ReceivedToolResult) {
        self.handlers
            .iter()
            .for_each(|h| h.on_after_tool_call(run_id, result));
    }
}

/// Logs every transition through `tracing`.
pub struct TracingHandler;

impl PipelineHandler for TracingHandler {
    fn on_run_created(&self, run_id: &RunId, strategy: &str) {
        debug!(run_id = %run_id, strategy, "Run created");
    }

    fn on_run_started(&self, run_id: &RunId, strategy: &str) {
        info!(run_id = %run_id, strategy, "Run started");
    }

    fn on_run_finished(&self, run_id: &RunId, strategy: &str, interrupted: bool) {
        info!(run_id = %run_id, strategy, interrupted, "Run finished");
    }

    fn on_run_error(&self, run_id: &RunId, strategy: &str, error: &StrandError) {
        error!(run_id = %run_id, strategy, error = %error, "Run failed");
    }

    fn on_before_node(&self, run_id: &RunId, node: &Node, _input: &Value) {
        debug!(run_id = %run_id, node_id = node.id(), "Node starting");
    }

    fn on_after_node(&self, run_id: &RunId, node: &Node, _output: &Value) {
        debug!(run_id = %run_id, node_id = node.id(), "Node finished");
    }

    fn on_before_llm_call(&self, run_id: &RunId, prompt: &[Message], tools: &[ToolDescriptor]) {
        debug!(
            run_id = %run_id,
            messages = prompt.len(),
            tools = tools.len(),
            "Model request"
        );
    }

    fn on_after_llm_call(&self, run_id: &RunId, responses: &[Message], with_tools: bool) {
        debug!(run_id = %run_id, responses = responses.len(), with_tools, "Model response");
    }

    fn on_before_tool_call(&self, run_id: &RunId, call: &ToolCall) {
        info!(run_id = %run_id, tool = %call.tool, "Tool call");
    }

    fn on_after_tool_call(&self, run_id: &RunId, result: &ReceivedToolResult) {
        debug!(
            run_id = %run_id,
            tool = %result.tool,
            success = result.succeeded(),
            "Tool result"
        );
    }
}

/// Publishes run transitions as [`AgentEvent`]s.
pub struct EventBusHandler {
    bus: Arc<EventBus>,
}

impl EventBusHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl PipelineHandler for EventBusHandler {
    fn on_run_started(&self, run_id: &RunId, strategy: &str) {
        self.bus.publish(AgentEvent::RunStarted {
            run_id: run_id.clone(),
            strategy: strategy.to_string(),
        });
    }

    fn on_run_finished(&self, run_id: &RunId, _strategy: &str, interrupted: bool) {
        self.bus.publish(AgentEvent::RunComplete {
            run_id: run_id.clone(),
            interrupted,
        });
    }

    fn on_run_error(&self, run_id: &RunId, _strategy: &str, error: &StrandError) {
        self.bus.publish(AgentEvent::RunError {
            run_id: run_id.clone(),
            error: error.to_string(),
        });
    }

    fn on_before_node(&self, run_id: &RunId, node: &Node, _input: &Value) {
        self.bus.publish(AgentEvent::NodeStarted {
            run_id: run_id.clone(),
            node_id: node.id().to_string(),
        });
    }

    fn on_after_node(&self, run_id: &RunId, node: &Node, _output: &Value) {
        self.bus.publish(AgentEvent::NodeCompleted {
            run_id: run_id.clone(),
            node_id: node.id().to_string(),
        });
    }

    fn on_before_llm_call(&self, run_id: &RunId, _prompt: &[Message], tools: &[ToolDescriptor]) {
        self.bus.publish(AgentEvent::LlmCall {
            run_id: run_id.clone(),
            with_tools: !tools.is_empty(),
        });
    }

    fn on_before_tool_call(&self, run_id: &RunId, call: &ToolCall) {
        self.bus.publish(AgentEvent::ToolStart {
            run_id: run_id.clone(),
            call: call.clone(),
        });
    }

    fn on_after_tool_call(&self, run_id: &RunId, result: &ReceivedToolResult) {
        self.bus.publish(AgentEvent::ToolEnd {
            run_id: run_id.clone(),
            result: result.clone(),
        });
    }
}
