use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::types::{AgentEvent, RunId};

/// Broadcast bus for run events.
///
/// [`EventBus::subscribe`] sees every run; [`EventBus::subscribe_run`] sees
/// one run and stops after its final event.
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: AgentEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe_run(&self, run_id: RunId) -> RunEvents {
        RunEvents {
            run_id,
            rx: self.tx.subscribe(),
            done: false,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Events of a single run, in publish order.
pub struct RunEvents {
    run_id: RunId,
    rx: broadcast::Receiver<AgentEvent>,
    done: bool,
}

impl RunEvents {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Next event of the run. `None` after `RunComplete`/`RunError`, or once
    /// the bus is dropped. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        while !self.done {
            match self.rx.recv().await {
                Ok(event) if event.run_id() == &self.run_id => {
                    self.done = event.ends_run();
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(run_id = %self.run_id, skipped, "Run event subscriber lagged");
                }
                Err(RecvError::Closed) => self.done = true,
            }
        }
        None
    }
}
