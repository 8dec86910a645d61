//! Graph model and executor.
//!
//! A strategy is a flat map of nodes keyed by fully-qualified id plus, for
//! each source node, an ordered list of outgoing edges. Execution walks from
//! the start node, taking the first edge whose chain accepts each output,
//! until the finish node has run.

pub mod builder;
pub mod edge;
pub mod node;
pub mod subgraph;
pub mod value;

pub use builder::{GraphBuilder, FINISH_NODE, START_NODE};
pub use edge::{Edge, EdgeBuilder};
pub use node::{Node, NodeExecutor, NodeRef};
pub use subgraph::{ExecutionResult, Strategy, ToolSelection};
pub use value::{downcast, erase, GraphValue, TypeTag, Value};
