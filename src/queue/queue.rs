use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::queue::store::QueueStore;
use crate::task::task::{Payload, TaskEnvelope};
use crate::worker::error::WorkerError;

/// Per-topic view over a [`QueueStore`], owning the key layout and envelope
/// serialization.
///
/// Each topic gets three structures in the store:
/// - `<topic>.submitted` — FIFO list of serialized envelopes awaiting claim
/// - `<topic>.pending`   — hash of task id → serialized envelope (in flight)
/// - `<topic>.complete`  — hash of task id → serialized envelope (finished)
///
/// Topics never share keys, so cycles for different topics cannot interfere.
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn QueueStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    fn submitted_key(topic: &str) -> String {
        format!("{}.submitted", topic)
    }

    fn pending_key(topic: &str) -> String {
        format!("{}.pending", topic)
    }

    fn complete_key(topic: &str) -> String {
        format!("{}.complete", topic)
    }

    /// Producer surface: serialize an envelope and push it onto its topic's
    /// submitted list.
    pub async fn submit(&self, envelope: &TaskEnvelope) -> Result<(), WorkerError> {
        let raw = serde_json::to_string(envelope)?;
        self.store
            .push_back(&Self::submitted_key(&envelope.topic), &raw)
            .await?;
        info!(topic = %envelope.topic, "task submitted");
        Ok(())
    }

    /// Atomically claim the oldest submitted envelope for `topic`, returning
    /// its raw serialized form, or `None` when the queue is empty.
    pub async fn claim_submitted(&self, topic: &str) -> Result<Option<String>, WorkerError> {
        self.store.pop_front(&Self::submitted_key(topic)).await
    }

    /// Record a claimed envelope as in flight under `task_id`.
    pub async fn record_pending(
        &self,
        topic: &str,
        task_id: Uuid,
        raw: &str,
    ) -> Result<(), WorkerError> {
        self.store
            .hash_set(&Self::pending_key(topic), &task_id.to_string(), raw)
            .await?;
        debug!(topic = %topic, task_id = %task_id, "task recorded as pending");
        Ok(())
    }

    /// Drop the pending record for `task_id`.
    pub async fn clear_pending(&self, topic: &str, task_id: Uuid) -> Result<(), WorkerError> {
        self.store
            .hash_delete(&Self::pending_key(topic), &task_id.to_string())
            .await
    }

    /// Write the finished envelope to the complete record under `task_id`.
    pub async fn record_complete(
        &self,
        topic: &str,
        task_id: Uuid,
        raw: &str,
    ) -> Result<(), WorkerError> {
        self.store
            .hash_set(&Self::complete_key(topic), &task_id.to_string(), raw)
            .await
    }

    /// Deserialized read of the pending record for `task_id`, if any.
    pub async fn fetch_pending(
        &self,
        topic: &str,
        task_id: Uuid,
    ) -> Result<Option<TaskEnvelope>, WorkerError> {
        let raw = self
            .store
            .hash_get(&Self::pending_key(topic), &task_id.to_string())
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Deserialized read of the complete record for `task_id`, if any.
    pub async fn fetch_complete(
        &self,
        topic: &str,
        task_id: Uuid,
    ) -> Result<Option<TaskEnvelope>, WorkerError> {
        let raw = self
            .store
            .hash_get(&Self::complete_key(topic), &task_id.to_string())
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Counts of the three per-topic structures, for supervisors and tests.
    pub async fn stats(&self, topic: &str) -> Result<QueueStats, WorkerError> {
        Ok(QueueStats {
            submitted: self.store.list_len(&Self::submitted_key(topic)).await?,
            pending: self.store.hash_len(&Self::pending_key(topic)).await?,
            complete: self.store.hash_len(&Self::complete_key(topic)).await?,
        })
    }
}

/// Snapshot of one topic's queue depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub pending: u64,
    pub complete: u64,
}

/// Detached task submission, handed to handlers through their context.
///
/// A handler that needs a fire-and-forget side effect enqueues it here and
/// returns without waiting; the submitted task is picked up by whichever
/// worker claims it next. The dispatcher neither waits on nor tracks it.
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit(&self, topic: &str, payload: Payload) -> Result<(), WorkerError>;
}

#[async_trait]
impl TaskSubmitter for TaskQueue {
    async fn submit(&self, topic: &str, payload: Payload) -> Result<(), WorkerError> {
        TaskQueue::submit(self, &TaskEnvelope::new(topic, payload)).await
    }
}
