use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;

use strand_core::error::{Result, StrandError};
use strand_core::types::Message;

/// Snapshot of a run, taken just before a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Strategy the run belongs to.
    pub strategy_id: String,
    pub run_id: String,
    /// Fully-qualified id of the node to resume at.
    pub node_id: String,
    /// The node's input (JSON).
    pub input_json: String,
    /// Conversation history (JSON).
    pub messages_json: String,
    /// Node executions so far.
    pub iteration: usize,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new<T: Serialize>(
        strategy_id: impl Into<String>,
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        input: &T,
        messages: &[Message],
        iteration: usize,
    ) -> Result<Self> {
        Ok(Self {
            strategy_id: strategy_id.into(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            input_json: serde_json::to_string(input)?,
            messages_json: serde_json::to_string(messages)?,
            iteration,
            timestamp: Utc::now(),
        })
    }

    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.input_json)?)
    }

    pub fn messages(&self) -> Result<Vec<Message>> {
        Ok(serde_json::from_str(&self.messages_json)?)
    }
}

fn db_error(context: &str) -> impl Fn(rusqlite::Error) -> StrandError + '_ {
    move |e| StrandError::Database(format!("{}: {}", context, e))
}

/// Persistent checkpoint store backed by SQLite.
///
/// Keeps the latest checkpoint per run.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_error("Failed to open checkpoint store"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(db_error("Failed to open checkpoint store"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 strategy_id TEXT NOT NULL,
                 run_id TEXT NOT NULL,
                 node_id TEXT NOT NULL,
                 input_json TEXT NOT NULL,
                 messages_json TEXT NOT NULL,
                 iteration INTEGER NOT NULL DEFAULT 0,
                 timestamp TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_cp_strategy_run
                 ON checkpoints(strategy_id, run_id);",
        )
        .map_err(db_error("Failed to initialize checkpoint schema"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StrandError::Database(e.to_string()))
    }

    /// Save a checkpoint, replacing any earlier one for the same run.
    pub fn save(&self, cp: &Checkpoint) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE strategy_id = ?1 AND run_id = ?2",
            params![cp.strategy_id, cp.run_id],
        )
        .map_err(db_error("Failed to clean old checkpoints"))?;

        conn.execute(
            "INSERT INTO checkpoints (strategy_id, run_id, node_id, input_json, messages_json, iteration, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cp.strategy_id,
                cp.run_id,
                cp.node_id,
                cp.input_json,
                cp.messages_json,
                cp.iteration as i64,
                cp.timestamp.to_rfc3339(),
            ],
        )
        .map_err(db_error("Failed to save checkpoint"))?;
        Ok(())
    }

    /// Most recently saved checkpoint for a strategy, across runs.
    pub fn load_latest(&self, strategy_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT strategy_id, run_id, node_id, input_json, messages_json, iteration, timestamp
                 FROM checkpoints
                 WHERE strategy_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
            )
            .map_err(db_error("Failed to prepare query"))?;

        let mut rows = stmt
            .query_map(params![strategy_id], |row| {
                let ts: String = row.get(6)?;
                Ok(Checkpoint {
                    strategy_id: row.get(0)?,
                    run_id: row.get(1)?,
                    node_id: row.get(2)?,
                    input_json: row.get(3)?,
                    messages_json: row.get(4)?,
                    iteration: row.get::<_, i64>(5)? as usize,
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(db_error("Failed to load checkpoint"))?;

        rows.next()
            .transpose()
            .map_err(db_error("Failed to read checkpoint"))
    }

    /// Delete a run's checkpoint.
    pub fn delete_run(&self, strategy_id: &str, run_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE strategy_id = ?1 AND run_id = ?2",
            params![strategy_id, run_id],
        )
        .map_err(db_error("Failed to delete checkpoint"))
    }

    /// Delete every checkpoint of a strategy.
    pub fn delete_strategy(&self, strategy_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE strategy_id = ?1",
            params![strategy_id],
        )
        .map_err(db_error("Failed to delete checkpoints"))
    }
}
