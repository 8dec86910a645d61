use tokio::sync::Mutex;
use tracing::debug;

use strand_core::error::{Result, StrandError};

use crate::graph::Value;

#[derive(Default)]
struct RunState {
    iterations: usize,
    execution_point: Option<(String, Value)>,
    point_assigned: bool,
}

/// Per-run iteration counter and execution-point slot.
pub struct AgentStateManager {
    max_iterations: usize,
    state: Mutex<RunState>,
}

impl AgentStateManager {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Count one node execution. Fails once the count passes the ceiling.
    pub async fn next_iteration(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.iterations >= self.max_iterations {
            return Err(StrandError::MaxIterationsReached(self.max_iterations));
        }
        state.iterations += 1;
        Ok(state.iterations)
    }

    pub async fn iterations(&self) -> usize {
        self.state.lock().await.iterations
    }

    /// Force the next node and its input. Only one assignment per run.
    pub async fn set_execution_point(&self, node_id: impl Into<String>, input: Value) -> Result<()> {
        let node_id = node_id.into();
        let mut state = self.state.lock().await;
        if state.point_assigned {
            return Err(StrandError::ExecutionPointAlreadySet(node_id));
        }
        debug!(node_id = %node_id, "Execution point set");
        state.point_assigned = true;
        state.execution_point = Some((node_id, input));
        Ok(())
    }

    /// Node id of the execution point, if one is waiting to be consumed.
    pub async fn pending_execution_point(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.execution_point.as_ref().map(|(id, _)| id.clone())
    }

    /// Input for the pending point, leaving it in place.
    pub(crate) async fn peek_execution_input(&self) -> Option<Value> {
        let state = self.state.lock().await;
        state.execution_point.as_ref().map(|(_, v)| v.clone())
    }

    /// Consume the pending point, returning its input.
    pub(crate) async fn take_execution_point(&self) -> Option<Value> {
        self.state.lock().await.execution_point.take().map(|(_, v)| v)
    }
}
