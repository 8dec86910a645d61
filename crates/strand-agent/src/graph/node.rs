use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use strand_core::error::{Result, StrandError};

use super::edge::EdgeBuilder;
use super::subgraph::SubgraphCore;
use super::value::{downcast, erase, GraphValue, TypeTag, Value};
use crate::context::AgentContext;

/// Type-erased node body.
pub trait NodeExecutor: Send + Sync + 'static {
    fn execute<'a>(&'a self, ctx: &'a AgentContext, input: Value) -> BoxFuture<'a, Result<Value>>;
}

/// Adapts an `async fn(AgentContext, I) -> Result<O>` closure to [`NodeExecutor`].
pub(crate) struct FnNode<I, O, F> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnNode<I, O, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<I, O, F, Fut> NodeExecutor for FnNode<I, O, F>
where
    I: GraphValue,
    O: GraphValue,
    F: Fn(AgentContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    fn execute<'a>(&'a self, ctx: &'a AgentContext, input: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let input = downcast::<I>(input).ok_or_else(|| StrandError::TypeMismatch {
                node: "<fn node>".to_string(),
                expected: std::any::type_name::<I>().to_string(),
                actual: "<other>".to_string(),
            })?;
            let output = (self.f)(ctx.clone(), input).await?;
            Ok(erase(output))
        })
    }
}

/// Passes its input through unchanged. Used for start and finish nodes.
pub(crate) struct PassThrough;

impl NodeExecutor for PassThrough {
    fn execute<'a>(&'a self, _ctx: &'a AgentContext, input: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { Ok(input) })
    }
}

#[derive(Clone)]
pub(crate) enum NodeKind {
    Start,
    Finish,
    Task,
    Subgraph(Arc<SubgraphCore>),
}

/// A graph node: metadata plus its stored body.
///
/// Created once when a strategy is built and immutable afterwards.
#[derive(Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) id: String,
    pub(crate) input: TypeTag,
    pub(crate) output: TypeTag,
    pub(crate) executor: Arc<dyn NodeExecutor>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully-qualified id: the owning subgraph's path plus the node name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_type(&self) -> TypeTag {
        self.input
    }

    pub fn output_type(&self) -> TypeTag {
        self.output
    }

    pub fn is_subgraph(&self) -> bool {
        matches!(self.kind, NodeKind::Subgraph(_))
    }

    /// Run the body, checking the value types on the way in and out.
    pub(crate) async fn run(
        &self,
        ctx: &AgentContext,
        input: Value,
        check_input: bool,
    ) -> Result<Value> {
        if check_input && !self.input.matches(&input) {
            return Err(StrandError::TypeMismatch {
                node: self.id.clone(),
                expected: self.input.name().to_string(),
                actual: "value of a different type".to_string(),
            });
        }
        let output = self.executor.execute(ctx, input).await?;
        if !self.output.matches(&output) {
            return Err(StrandError::TypeMismatch {
                node: self.id.clone(),
                expected: self.output.name().to_string(),
                actual: "value of a different type".to_string(),
            });
        }
        Ok(output)
    }

    /// Whether `node_id` names this node or something nested inside it.
    pub(crate) fn contains(&self, node_id: &str) -> bool {
        if self.id == node_id {
            return true;
        }
        match &self.kind {
            NodeKind::Subgraph(core) => core.contains(node_id),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

/// Typed handle to a node, returned by the graph builder.
pub struct NodeRef<I, O> {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) graph: String,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> NodeRef<I, O> {
    pub(crate) fn new(id: String, name: String, graph: String) -> Self {
        Self {
            id,
            name,
            graph,
            _types: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<I, O: GraphValue> NodeRef<I, O> {
    /// Start an edge from this node toward `target`.
    pub fn forward_to<TI, TO>(&self, target: &NodeRef<TI, TO>) -> EdgeBuilder<O, TI, O> {
        EdgeBuilder::new(self, target)
    }
}

impl<I, O> Clone for NodeRef<I, O> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone(), self.name.clone(), self.graph.clone())
    }
}

impl<I, O> std::fmt::Debug for NodeRef<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeRef").field(&self.id).finish()
    }
}
