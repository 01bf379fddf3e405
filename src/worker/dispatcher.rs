use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::queue::TaskQueue;
use crate::task::task::{TaskContext, TaskEnvelope, TaskHandler};
use crate::worker::error::WorkerError;

/// Executes one claim-execute-record cycle per call.
///
/// All coordination with other workers goes through the store's atomic
/// operations; the dispatcher itself holds no cross-cycle state. Each cycle
/// owns a freshly minted identifier, so concurrent cycles for the same topic
/// interleave freely without touching each other's records.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    cancel_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Use `token` as the parent of the cancellation tokens handed to
    /// handlers. The engine wires its shutdown token in here.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Claim the oldest submitted envelope for `topic`, run `handler`
    /// against it, and record the outcome.
    ///
    /// The cycle walks the queue state machine:
    ///
    /// 1. Pop from `<topic>.submitted`; an empty queue fails with
    ///    [`WorkerError::QueueEmpty`] before an identifier is minted or any
    ///    state is touched.
    /// 2. Mint a fresh task id.
    /// 3. Write id → raw envelope into `<topic>.pending`. This happens
    ///    before the envelope is even decoded, so a crash anywhere past this
    ///    point leaves the task recoverable instead of lost.
    /// 4. Decode the envelope. A decode failure ends the cycle with
    ///    [`WorkerError::Serialization`]; the raw envelope stays in pending
    ///    for inspection.
    /// 5. Run the handler against the mutable payload. On success the
    ///    mutated envelope is written to `<topic>.complete` and only then
    ///    removed from pending; a crash between the two leaves the result
    ///    discoverable in both, resolved by callers checking complete first.
    ///    On failure, `persist` decides: `true` keeps the pending record for
    ///    an external retry pass, `false` discards it.
    ///
    /// Returns the task id; after a successful return the id is present in
    /// complete and absent from pending.
    pub async fn process_queue_item(
        &self,
        topic: &str,
        handler: Arc<dyn TaskHandler>,
        persist: bool,
    ) -> Result<Uuid, WorkerError> {
        let raw = self
            .queue
            .claim_submitted(topic)
            .await?
            .ok_or_else(|| WorkerError::QueueEmpty(topic.to_string()))?;

        let task_id = Uuid::new_v4();
        self.queue.record_pending(topic, task_id, &raw).await?;

        let envelope: TaskEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Undecodable envelope stays in pending rather than being lost.
                warn!(topic = %topic, task_id = %task_id, error = %e, "claimed envelope failed to decode");
                return Err(WorkerError::Serialization(e));
            }
        };

        let mut payload = envelope.payload;
        let context = TaskContext {
            task_id,
            topic: topic.to_string(),
            claimed_at: chrono::Utc::now(),
            cancel_token: self.cancel_token.child_token(),
            submitter: self.queue.clone(),
        };

        debug!(topic = %topic, task_id = %task_id, "dispatching task to handler");
        match handler.handle(&mut payload, context).await {
            Ok(()) => {
                let done = TaskEnvelope::new(envelope.topic, payload);
                let raw_done = serde_json::to_string(&done)?;
                // Write-then-delete: the result must be discoverable before
                // the in-flight marker goes away.
                self.queue.record_complete(topic, task_id, &raw_done).await?;
                self.queue.clear_pending(topic, task_id).await?;
                info!(topic = %topic, task_id = %task_id, "task completed");
                Ok(task_id)
            }
            Err(err) => {
                if persist {
                    warn!(
                        topic = %topic,
                        task_id = %task_id,
                        retryable = err.is_retryable(),
                        error = %err,
                        "task failed; pending record kept"
                    );
                } else {
                    self.queue.clear_pending(topic, task_id).await?;
                    warn!(topic = %topic, task_id = %task_id, error = %err, "task failed; discarded");
                }
                Err(WorkerError::Execution {
                    task_id,
                    source: err,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryStore;
    use crate::queue::store::QueueStore;
    use crate::task::error::HandlerError;
    use crate::task::task::Payload;
    use async_trait::async_trait;
    use serde_json::json;

    struct Uppercase;

    #[async_trait]
    impl TaskHandler for Uppercase {
        async fn handle(
            &self,
            payload: &mut Payload,
            _context: TaskContext,
        ) -> Result<(), HandlerError> {
            let message = payload
                .get("message")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HandlerError::Fatal("missing message".into()))?
                .to_uppercase();
            payload.insert("message".into(), json!(message));
            Ok(())
        }

        fn topic(&self) -> String {
            "sample".to_string()
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl TaskHandler for AlwaysFails {
        async fn handle(
            &self,
            _payload: &mut Payload,
            _context: TaskContext,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::Retry("downstream unavailable".into()))
        }

        fn topic(&self) -> String {
            "sample".to_string()
        }
    }

    fn harness() -> (Arc<MemoryStore>, Arc<TaskQueue>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(TaskQueue::new(store.clone()));
        let dispatcher = Dispatcher::new(queue.clone());
        (store, queue, dispatcher)
    }

    async fn submit_sample(queue: &TaskQueue, message: &str) {
        let payload: Payload = [("message".to_string(), json!(message))].into_iter().collect();
        queue
            .submit(&TaskEnvelope::new("sample", payload))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_queue_fails_without_state_change() {
        let (_store, queue, dispatcher) = harness();

        let result = dispatcher
            .process_queue_item("sample", Arc::new(Uppercase), true)
            .await;

        assert!(matches!(result, Err(WorkerError::QueueEmpty(t)) if t == "sample"));
        let stats = queue.stats("sample").await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.complete, 0);
    }

    #[tokio::test]
    async fn successful_cycle_moves_task_to_complete() {
        let (_store, queue, dispatcher) = harness();
        submit_sample(&queue, "hello").await;

        let task_id = dispatcher
            .process_queue_item("sample", Arc::new(Uppercase), true)
            .await
            .unwrap();

        assert_eq!(queue.fetch_pending("sample", task_id).await.unwrap(), None);
        let complete = queue
            .fetch_complete("sample", task_id)
            .await
            .unwrap()
            .expect("complete record");
        assert_eq!(complete.payload["message"], json!("HELLO"));

        // Stable under repeated reads
        assert_eq!(queue.fetch_pending("sample", task_id).await.unwrap(), None);
        assert!(queue.fetch_complete("sample", task_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn each_cycle_claims_exactly_one_envelope_in_order() {
        let (_store, queue, dispatcher) = harness();
        submit_sample(&queue, "first").await;
        submit_sample(&queue, "second").await;

        let id_a = dispatcher
            .process_queue_item("sample", Arc::new(Uppercase), true)
            .await
            .unwrap();
        let id_b = dispatcher
            .process_queue_item("sample", Arc::new(Uppercase), true)
            .await
            .unwrap();
        assert_ne!(id_a, id_b);

        let first = queue.fetch_complete("sample", id_a).await.unwrap().unwrap();
        let second = queue.fetch_complete("sample", id_b).await.unwrap().unwrap();
        assert_eq!(first.payload["message"], json!("FIRST"));
        assert_eq!(second.payload["message"], json!("SECOND"));

        // No duplication: a third cycle finds nothing
        let result = dispatcher
            .process_queue_item("sample", Arc::new(Uppercase), true)
            .await;
        assert!(matches!(result, Err(WorkerError::QueueEmpty(_))));
    }

    #[tokio::test]
    async fn persist_keeps_failed_task_in_pending() {
        let (_store, queue, dispatcher) = harness();
        submit_sample(&queue, "doomed").await;

        let result = dispatcher
            .process_queue_item("sample", Arc::new(AlwaysFails), true)
            .await;

        let task_id = match result {
            Err(WorkerError::Execution { task_id, source }) => {
                assert!(source.is_retryable());
                task_id
            }
            other => panic!("expected execution failure, got {:?}", other),
        };

        let pending = queue
            .fetch_pending("sample", task_id)
            .await
            .unwrap()
            .expect("pending residue");
        assert_eq!(pending.payload["message"], json!("doomed"));
        assert_eq!(queue.fetch_complete("sample", task_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ephemeral_mode_discards_failed_task() {
        let (_store, queue, dispatcher) = harness();
        submit_sample(&queue, "doomed").await;

        let result = dispatcher
            .process_queue_item("sample", Arc::new(AlwaysFails), false)
            .await;
        assert!(matches!(result, Err(WorkerError::Execution { .. })));

        let stats = queue.stats("sample").await.unwrap();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.complete, 0);
    }

    #[tokio::test]
    async fn undecodable_envelope_stays_in_pending() {
        let (store, queue, dispatcher) = harness();
        store
            .push_back("sample.submitted", "{not json at all")
            .await
            .unwrap();

        let result = dispatcher
            .process_queue_item("sample", Arc::new(Uppercase), true)
            .await;
        assert!(matches!(result, Err(WorkerError::Serialization(_))));

        let stats = queue.stats("sample").await.unwrap();
        assert_eq!(stats.submitted, 0, "envelope was claimed");
        assert_eq!(stats.pending, 1, "raw envelope kept for inspection");
        assert_eq!(stats.complete, 0);
    }

    #[tokio::test]
    async fn handler_can_submit_detached_followup() {
        struct FansOut;

        #[async_trait]
        impl TaskHandler for FansOut {
            async fn handle(
                &self,
                payload: &mut Payload,
                context: TaskContext,
            ) -> Result<(), HandlerError> {
                let mut followup = Payload::new();
                followup.insert("origin".into(), json!(context.task_id.to_string()));
                context
                    .submitter
                    .submit("notify", followup)
                    .await
                    .map_err(|e| HandlerError::Retry(e.to_string()))?;
                payload.insert("fanned_out".into(), json!(true));
                Ok(())
            }

            fn topic(&self) -> String {
                "sample".to_string()
            }
        }

        let (_store, queue, dispatcher) = harness();
        submit_sample(&queue, "hello").await;

        let task_id = dispatcher
            .process_queue_item("sample", Arc::new(FansOut), true)
            .await
            .unwrap();

        assert_eq!(queue.stats("notify").await.unwrap().submitted, 1);
        let complete = queue.fetch_complete("sample", task_id).await.unwrap().unwrap();
        assert_eq!(complete.payload["fanned_out"], json!(true));
    }
}
