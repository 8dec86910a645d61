pub mod checkpoint;
pub mod compression;
pub mod context;
pub mod environment;
pub mod graph;
pub mod nodes;
pub mod pipeline;
pub mod runner;
pub mod safe;
pub mod session;
pub mod state;
pub mod storage;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use compression::HistoryCompression;
pub use context::{AgentContext, AgentContextBuilder};
pub use environment::{
    AgentEnvironment, AgentMessage, ChannelEnvironment, EnvironmentHandle, EnvironmentMessage,
    LocalEnvironment,
};
pub use graph::{
    EdgeBuilder, ExecutionResult, GraphBuilder, GraphValue, Node, NodeExecutor, NodeRef, Strategy,
    ToolSelection,
};
pub use pipeline::{EventBusHandler, FeaturePipeline, PipelineHandler, TracingHandler};
pub use runner::{AgentRunner, AgentRunnerBuilder, ErrorDisposition, ErrorHandler};
pub use safe::{SafeResult, SafeTool};
pub use session::{ModelSession, ReadSession, WriteSession};
pub use state::AgentStateManager;
pub use storage::{AgentStorage, StorageKey};
