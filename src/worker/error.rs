use redis::RedisError;
use thiserror::Error;
use uuid::Uuid;

use crate::task::error::HandlerError;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// No submitted envelope was available at claim time. Nothing was
    /// mutated and no identifier was minted.
    #[error("no submitted task available for topic: {0}")]
    QueueEmpty(String),

    /// The topic has no registered handler. Surfaced before any queue
    /// mutation.
    #[error("no handler registered for topic: {0}")]
    HandlerNotFound(String),

    /// The handler failed during execution. The identifier names the pending
    /// record left behind when the cycle ran in persist mode.
    #[error("task {task_id} execution failed: {source}")]
    Execution {
        task_id: Uuid,
        #[source]
        source: HandlerError,
    },

    /// An envelope could not be decoded or encoded. Fatal for the cycle;
    /// a claimed envelope stays in pending for later inspection.
    #[error("envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("worker engine is already running")]
    AlreadyRunning,
}

impl From<RedisError> for WorkerError {
    fn from(err: RedisError) -> Self {
        WorkerError::Redis(err.to_string())
    }
}

impl WorkerError {
    /// Whether the error is transient from the engine's point of view.
    /// Queue-empty is expected in steady state and handled by backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkerError::QueueEmpty(_) | WorkerError::Redis(_) | WorkerError::Store(_)
        )
    }
}
