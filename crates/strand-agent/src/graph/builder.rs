use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use strand_core::error::{Result, StrandError};

use super::edge::{Edge, EdgeBuilder, EdgeTable};
use super::node::{FnNode, Node, NodeExecutor, NodeKind, NodeRef, PassThrough};
use super::subgraph::{Strategy, SubgraphCore, ToolSelection};
use super::value::{GraphValue, TypeTag};
use crate::context::AgentContext;

pub const START_NODE: &str = "__start__";
pub const FINISH_NODE: &str = "__finish__";

/// Builds a strategy, or a nested subgraph, from typed nodes and edges.
///
/// Node ids are the graph's path joined with the node name, so
/// `strategy/sub/node` names `node` inside subgraph `sub`.
pub struct GraphBuilder<I, O> {
    name: String,
    path: String,
    nodes: HashMap<String, Node>,
    edges: EdgeTable,
    tool_selection: ToolSelection,
    errors: Vec<String>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: GraphValue, O: GraphValue> GraphBuilder<I, O> {
    /// Start a top-level strategy.
    pub fn strategy(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_path(name.clone(), name, ToolSelection::All)
    }

    fn with_path(name: String, path: String, tool_selection: ToolSelection) -> Self {
        let mut builder = Self {
            name,
            path,
            nodes: HashMap::new(),
            edges: EdgeTable::default(),
            tool_selection,
            errors: Vec::new(),
            _types: PhantomData,
        };
        builder.insert(START_NODE, TypeTag::of::<I>(), TypeTag::of::<I>(), NodeKind::Start);
        builder.insert(FINISH_NODE, TypeTag::of::<O>(), TypeTag::of::<O>(), NodeKind::Finish);
        builder
    }

    fn insert(&mut self, name: &str, input: TypeTag, output: TypeTag, kind: NodeKind) {
        let id = self.child_id(name);
        self.nodes.insert(
            id.clone(),
            Node {
                name: name.to_string(),
                id,
                input,
                output,
                executor: Arc::new(PassThrough),
                kind,
            },
        );
    }

    fn child_id(&self, name: &str) -> String {
        format!("{}/{}", self.path, name)
    }

    fn node_ref<NI, NO>(&self, name: &str) -> NodeRef<NI, NO> {
        NodeRef::new(self.child_id(name), name.to_string(), self.path.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> NodeRef<I, I> {
        self.node_ref(START_NODE)
    }

    pub fn finish(&self) -> NodeRef<O, O> {
        self.node_ref(FINISH_NODE)
    }

    /// Add a node whose body is an async closure.
    pub fn node<NI, NO, F, Fut>(&mut self, name: &str, body: F) -> NodeRef<NI, NO>
    where
        NI: GraphValue,
        NO: GraphValue,
        F: Fn(AgentContext, NI) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NO>> + Send + 'static,
    {
        self.add_node(name, FnNode::<NI, NO, F>::new(body))
    }

    /// Add a node with a hand-written body.
    pub fn add_node<NI: GraphValue, NO: GraphValue>(
        &mut self,
        name: &str,
        executor: impl NodeExecutor,
    ) -> NodeRef<NI, NO> {
        self.add(Node {
            name: name.to_string(),
            id: self.child_id(name),
            input: TypeTag::of::<NI>(),
            output: TypeTag::of::<NO>(),
            executor: Arc::new(executor),
            kind: NodeKind::Task,
        })
    }

    /// Add a nested subgraph with its own start, finish and tool scope.
    pub fn subgraph<SI: GraphValue, SO: GraphValue>(
        &mut self,
        name: &str,
        tool_selection: ToolSelection,
        define: impl FnOnce(&mut GraphBuilder<SI, SO>),
    ) -> NodeRef<SI, SO> {
        let mut inner = GraphBuilder::<SI, SO>::with_path(
            name.to_string(),
            self.child_id(name),
            tool_selection,
        );
        define(&mut inner);
        match inner.into_core() {
            Ok(core) => self.add(Node::subgraph(core)),
            Err(e) => {
                self.errors.push(e.to_string());
                self.node_ref(name)
            }
        }
    }

    fn add<NI, NO>(&mut self, node: Node) -> NodeRef<NI, NO> {
        let name = node.name.clone();
        if self.nodes.contains_key(&node.id) {
            self.errors
                .push(format!("duplicate node '{}' in graph '{}'", name, self.path));
        } else {
            self.nodes.insert(node.id.clone(), node);
        }
        self.node_ref(&name)
    }

    /// Add an edge. Its chain must end in the target's input type.
    pub fn edge<S, T>(&mut self, edge: EdgeBuilder<S, T, T>) {
        if edge.source_graph != self.path || edge.target_graph != self.path {
            self.errors.push(format!(
                "edge {} -> {} references a node outside graph '{}'",
                edge.source, edge.target, self.path
            ));
            return;
        }
        self.edges.add(Edge {
            source: edge.source,
            target: edge.target,
            steps: edge.steps,
        });
    }

    fn into_core(self) -> Result<SubgraphCore> {
        if !self.errors.is_empty() {
            return Err(StrandError::GraphBuild(self.errors.join("; ")));
        }
        Ok(SubgraphCore {
            start: self.child_id(START_NODE),
            finish: self.child_id(FINISH_NODE),
            name: self.name,
            id: self.path,
            nodes: self.nodes,
            edges: self.edges,
            tool_selection: self.tool_selection,
            input: TypeTag::of::<I>(),
            output: TypeTag::of::<O>(),
        })
    }

    /// Finish the top-level graph.
    pub fn build(self) -> Result<Strategy<I, O>> {
        self.into_core().map(Strategy::new)
    }
}
