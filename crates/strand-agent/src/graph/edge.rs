use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use strand_core::types::{Message, ReceivedToolResult, Role, ToolCall};

use super::node::NodeRef;
use super::value::{downcast, erase, GraphValue, Value};
use crate::context::AgentContext;

type Condition = Arc<dyn Fn(&AgentContext, &Value) -> bool + Send + Sync>;
type Transform = Arc<dyn Fn(&AgentContext, Value) -> Option<Value> + Send + Sync>;

/// One step of an edge chain.
///
/// A condition may reject the value; a transform converts it, or rejects it
/// by returning `None`.
#[derive(Clone)]
pub(crate) enum EdgeStep {
    Condition(Condition),
    Transform(Transform),
}

/// A directed connection between two nodes of the same graph.
#[derive(Clone)]
pub struct Edge {
    pub(crate) source: String,
    pub(crate) target: String,
    pub(crate) steps: Vec<EdgeStep>,
}

impl Edge {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run the chain over `value`. `None` means some step rejected it.
    pub(crate) fn forward(&self, ctx: &AgentContext, value: Value) -> Option<Value> {
        let mut current = value;
        for step in &self.steps {
            match step {
                EdgeStep::Condition(accepts) => {
                    if !accepts(ctx, &current) {
                        return None;
                    }
                }
                EdgeStep::Transform(transform) => current = transform(ctx, current)?,
            }
        }
        Some(current)
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Outgoing edges per source node, in declaration order.
#[derive(Clone, Default, Debug)]
pub(crate) struct EdgeTable {
    outgoing: HashMap<String, Vec<Edge>>,
}

impl EdgeTable {
    /// Add an edge. An existing edge with the same source and target is
    /// dropped and the new one goes to the end of the list.
    pub(crate) fn add(&mut self, edge: Edge) {
        let edges = self.outgoing.entry(edge.source.clone()).or_default();
        edges.retain(|e| e.target != edge.target);
        edges.push(edge);
    }

    pub(crate) fn outgoing(&self, source: &str) -> &[Edge] {
        self.outgoing.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First edge, in declaration order, whose chain accepts `output`.
    pub(crate) fn select(
        &self,
        ctx: &AgentContext,
        source: &str,
        output: &Value,
    ) -> Option<(String, Value)> {
        self.outgoing(source).iter().find_map(|edge| {
            edge.forward(ctx, output.clone())
                .map(|value| (edge.target.clone(), value))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }
}

/// Typed edge under construction.
///
/// `S` is the source node's output, `T` the target node's input and `C` the
/// type the chain currently yields. The graph builder only accepts an edge
/// once `C` equals `T`.
pub struct EdgeBuilder<S, T, C> {
    pub(crate) source: String,
    pub(crate) source_graph: String,
    pub(crate) target: String,
    pub(crate) target_graph: String,
    pub(crate) steps: Vec<EdgeStep>,
    _types: PhantomData<fn(S, T) -> C>,
}

impl<S: GraphValue, T> EdgeBuilder<S, T, S> {
    pub(crate) fn new<SI, TO>(source: &NodeRef<SI, S>, target: &NodeRef<T, TO>) -> Self {
        Self {
            source: source.id.clone(),
            source_graph: source.graph.clone(),
            target: target.id.clone(),
            target_graph: target.graph.clone(),
            steps: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<S, T, C: GraphValue> EdgeBuilder<S, T, C> {
    fn push<N>(mut self, step: EdgeStep) -> EdgeBuilder<S, T, N> {
        self.steps.push(step);
        EdgeBuilder {
            source: self.source,
            source_graph: self.source_graph,
            target: self.target,
            target_graph: self.target_graph,
            steps: self.steps,
            _types: PhantomData,
        }
    }

    /// Accept the value only when `condition` holds.
    pub fn on_condition(
        self,
        condition: impl Fn(&AgentContext, &C) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.push(EdgeStep::Condition(Arc::new(move |ctx: &AgentContext, value: &Value| {
            value
                .downcast_ref::<C>()
                .is_some_and(|typed| condition(ctx, typed))
        })))
    }

    /// Convert the value before it reaches the target.
    pub fn transformed<N: GraphValue>(
        self,
        transform: impl Fn(&AgentContext, C) -> N + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, N> {
        self.push(EdgeStep::Transform(Arc::new(move |ctx: &AgentContext, value: Value| {
            downcast::<C>(value).map(|typed| erase(transform(ctx, typed)))
        })))
    }

    /// Convert the value, rejecting it when `transform` returns `None`.
    pub fn filter_map<N: GraphValue>(
        self,
        transform: impl Fn(&AgentContext, C) -> Option<N> + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, N> {
        self.push(EdgeStep::Transform(Arc::new(move |ctx: &AgentContext, value: Value| {
            downcast::<C>(value)
                .and_then(|typed| transform(ctx, typed))
                .map(erase)
        })))
    }
}

impl<S, T> EdgeBuilder<S, T, Message> {
    /// Accept a tool call message matching `condition`; yields the call.
    pub fn on_tool_call(
        self,
        condition: impl Fn(&ToolCall) -> bool + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, ToolCall> {
        self.filter_map(move |_, message| {
            message
                .as_tool_call()
                .filter(|call| condition(call))
                .cloned()
        })
    }

    /// Accept a call to the tool called `name`.
    pub fn on_tool_call_named(self, name: impl Into<String>) -> EdgeBuilder<S, T, ToolCall> {
        let name = name.into();
        self.on_tool_call(move |call| call.tool == name)
    }

    /// Accept a plain assistant reply matching `condition`; yields its text.
    pub fn on_assistant_message(
        self,
        condition: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, String> {
        self.filter_map(move |_, message| match (message.role, message.text()) {
            (Role::Assistant, Some(text)) if condition(text) => Some(text.to_string()),
            _ => None,
        })
    }
}

impl<S, T> EdgeBuilder<S, T, Vec<Message>> {
    /// Accept a response holding at least one tool call; yields the calls.
    pub fn on_multiple_tool_calls(
        self,
        condition: impl Fn(&[ToolCall]) -> bool + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, Vec<ToolCall>> {
        self.filter_map(move |_, messages| {
            let calls: Vec<ToolCall> = messages
                .iter()
                .filter_map(|m| m.as_tool_call().cloned())
                .collect();
            (!calls.is_empty() && condition(&calls)).then_some(calls)
        })
    }

    /// Accept a response made only of assistant text; yields the texts.
    pub fn on_multiple_assistant_messages(
        self,
        condition: impl Fn(&[String]) -> bool + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, Vec<String>> {
        self.filter_map(move |_, messages| {
            let texts: Option<Vec<String>> = messages
                .iter()
                .map(|m| match m.role {
                    Role::Assistant => m.text().map(str::to_string),
                    _ => None,
                })
                .collect();
            texts.filter(|t| !t.is_empty() && condition(t))
        })
    }
}

impl<S, T> EdgeBuilder<S, T, ReceivedToolResult> {
    /// Accept a result that carries a non-null structured payload.
    pub fn on_tool_result_success(
        self,
        condition: impl Fn(&ReceivedToolResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_condition(move |_, result| result.succeeded() && condition(result))
    }

    /// Accept a result without a payload, or with a `null` one.
    pub fn on_tool_result_failure(
        self,
        condition: impl Fn(&ReceivedToolResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_condition(move |_, result| !result.succeeded() && condition(result))
    }
}

impl<S, T, C> std::fmt::Debug for EdgeBuilder<S, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeBuilder")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}
