use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use strand_core::error::{Result, StrandError};

use super::edge::EdgeTable;
use super::node::{Node, NodeKind};
use super::value::{downcast, erase, GraphValue, TypeTag, Value};
use crate::context::AgentContext;

/// Which tools a subgraph exposes to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "tools", rename_all = "lowercase")]
pub enum ToolSelection {
    /// Keep whatever the enclosing graph exposes.
    #[default]
    All,
    /// Expose no tools.
    None,
    /// Expose only the named tools, picked from the run's tool catalog.
    Only(Vec<String>),
}

/// Outcome of a strategy run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult<T> {
    Success(T),
    Interrupted(String),
}

impl<T> ExecutionResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Interrupted(_) => None,
        }
    }
}

/// Untyped body shared by strategies and nested subgraphs.
pub(crate) struct SubgraphCore {
    pub(crate) name: String,
    pub(crate) id: String,
    pub(crate) start: String,
    pub(crate) finish: String,
    pub(crate) nodes: HashMap<String, Node>,
    pub(crate) edges: EdgeTable,
    pub(crate) tool_selection: ToolSelection,
    pub(crate) input: TypeTag,
    pub(crate) output: TypeTag,
}

impl SubgraphCore {
    /// Whether `node_id` is a node of this graph or of a nested subgraph.
    pub(crate) fn contains(&self, node_id: &str) -> bool {
        self.nodes.values().any(|n| n.contains(node_id))
    }

    /// Node of this graph that is, or encloses, `node_id`.
    fn node_containing(&self, node_id: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.contains(node_id))
    }

    fn node(&self, node_id: &str) -> Result<&Node> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| StrandError::NodeNotFound(node_id.to_string()))
    }

    /// Run with the tool scope this subgraph asks for.
    ///
    /// A narrowed scope runs against a copy of the context. Its history is
    /// merged back into the enclosing session however the run ends.
    pub(crate) async fn execute(&self, ctx: &AgentContext, input: Value) -> Result<Value> {
        let scoped = match &self.tool_selection {
            ToolSelection::All => None,
            ToolSelection::None => Some(ctx.with_tools(Vec::new()).await),
            ToolSelection::Only(names) => {
                let tools = ctx
                    .tool_catalog()
                    .iter()
                    .filter(|t| names.contains(&t.name))
                    .cloned()
                    .collect();
                Some(ctx.with_tools(tools).await)
            }
        };

        match scoped {
            None => self.run_loop(ctx, input).await,
            Some(inner) => {
                let result = self.run_loop(&inner, input).await;
                ctx.session().absorb(inner.session()).await;
                result
            }
        }
    }

    async fn run_loop(&self, ctx: &AgentContext, input: Value) -> Result<Value> {
        let mut current = self.node(&self.start)?;
        let mut value = input;
        let mut resumed = false;

        if let Some(point) = ctx.state().pending_execution_point().await {
            (current, value, resumed) = self.resolve_point(ctx, &point).await?;
        }

        debug!(subgraph = %self.id, start = %current.id, "Entering subgraph");

        loop {
            if ctx.is_cancelled() {
                return Err(StrandError::Cancelled);
            }
            let iteration = ctx.state().next_iteration().await?;

            ctx.pipeline().before_node(ctx.run_id(), current, &value);
            // A subgraph entered on the way to a nested point receives the
            // inner node's input.
            let output = current.run(ctx, value, !resumed).await?;
            resumed = false;
            ctx.pipeline().after_node(ctx.run_id(), current, &output);
            debug!(node_id = %current.id, iteration, "Node completed");

            if current.id == self.finish {
                return Ok(output);
            }

            if let Some(point) = ctx.state().pending_execution_point().await {
                (current, value, resumed) = self.resolve_point(ctx, &point).await?;
                info!(node_id = %current.id, point = %point, "Jumping to execution point");
                continue;
            }

            match self.edges.select(ctx, &current.id, &output) {
                Some((target, next)) => {
                    current = self.node(&target)?;
                    value = next;
                }
                None => {
                    let rendered = current.output.describe(&output);
                    warn!(node_id = %current.id, output = %rendered, "No edge accepted node output");
                    return Err(StrandError::Stuck {
                        node: current.id.clone(),
                        output: rendered,
                    });
                }
            }
        }
    }

    /// Find where a pending execution point lands in this graph.
    ///
    /// A point naming one of our own nodes is consumed here. A point inside a
    /// nested subgraph is left pending for that subgraph to consume, and the
    /// returned flag is set.
    async fn resolve_point(
        &self,
        ctx: &AgentContext,
        point: &str,
    ) -> Result<(&Node, Value, bool)> {
        let node = self
            .node_containing(point)
            .ok_or_else(|| StrandError::NodeNotFound(point.to_string()))?;
        let nested = node.id != point;
        let input = if nested {
            ctx.state().peek_execution_input().await
        } else {
            ctx.state().take_execution_point().await
        };
        let input = input.ok_or_else(|| StrandError::NodeNotFound(point.to_string()))?;
        Ok((node, input, nested))
    }
}

/// A complete agent workflow: a top-level graph from `I` to `O`.
pub struct Strategy<I, O> {
    pub(crate) core: Arc<SubgraphCore>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: GraphValue, O: GraphValue> Strategy<I, O> {
    pub(crate) fn new(core: SubgraphCore) -> Self {
        Self {
            core: Arc::new(core),
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether `node_id` (fully qualified) names a node anywhere in this strategy.
    pub fn contains(&self, node_id: &str) -> bool {
        self.core.contains(node_id)
    }

    /// Ids of the top-level nodes, sorted.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.core.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn edge_count(&self) -> usize {
        self.core.edges.len()
    }

    /// Run the graph from its start node, or from a pending execution point.
    ///
    /// Client termination and cancellation end the run as `Interrupted`;
    /// every other failure is returned as an error.
    pub async fn execute(&self, ctx: &AgentContext, input: I) -> Result<ExecutionResult<O>> {
        self.execute_value(ctx, erase(input)).await
    }

    /// Run with an already erased input. A resumed run starts from its
    /// execution point, so its input is never checked against `I`.
    pub(crate) async fn execute_value(
        &self,
        ctx: &AgentContext,
        input: Value,
    ) -> Result<ExecutionResult<O>> {
        match self.core.execute(ctx, input).await {
            Ok(output) => {
                let output = downcast::<O>(output).ok_or_else(|| StrandError::TypeMismatch {
                    node: self.core.finish.clone(),
                    expected: std::any::type_name::<O>().to_string(),
                    actual: self.core.output.name().to_string(),
                })?;
                Ok(ExecutionResult::Success(output))
            }
            Err(StrandError::TerminatedByClient(reason)) => Ok(ExecutionResult::Interrupted(reason)),
            Err(StrandError::Cancelled) => Ok(ExecutionResult::Interrupted("cancelled".into())),
            Err(e) => Err(e),
        }
    }
}

impl<I, O> Clone for Strategy<I, O> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _types: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for Strategy<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.core.name)
            .field("nodes", &self.core.nodes.len())
            .finish()
    }
}

impl Node {
    /// Wrap a subgraph so it can sit in an enclosing graph.
    pub(crate) fn subgraph(core: SubgraphCore) -> Self {
        let core = Arc::new(core);
        Self {
            name: core.name.clone(),
            id: core.id.clone(),
            input: core.input,
            output: core.output,
            executor: Arc::new(SubgraphExecutor(core.clone())),
            kind: NodeKind::Subgraph(core),
        }
    }
}

struct SubgraphExecutor(Arc<SubgraphCore>);

impl super::node::NodeExecutor for SubgraphExecutor {
    fn execute<'a>(
        &'a self,
        ctx: &'a AgentContext,
        input: Value,
    ) -> futures::future::BoxFuture<'a, Result<Value>> {
        Box::pin(self.0.execute(ctx, input))
    }
}
