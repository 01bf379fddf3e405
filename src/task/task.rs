use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::HandlerError;
use crate::queue::queue::TaskSubmitter;
use crate::worker::error::WorkerError;

/// Open string-keyed mapping carried by every task. Handlers mutate it in
/// place; whatever they leave behind is what lands in the complete record.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The serialized unit of work moving through the queues.
///
/// On the wire an envelope is a flat JSON object: the `topic` field sits next
/// to the payload fields rather than nesting them, so
/// `{"message": "hi", "number": "+15550100", "topic": "sample"}` decodes into
/// topic `sample` with a two-field payload. The flat form round-trips through
/// decode → mutate → encode without loss.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub topic: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl TaskEnvelope {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Context provided to task handlers during execution.
#[derive(Clone)]
pub struct TaskContext {
    /// Identifier minted when the envelope was claimed; also the key of the
    /// pending record the handler is currently running under.
    pub task_id: Uuid,
    pub topic: String,
    /// When the dispatcher claimed the envelope from the submitted queue.
    pub claimed_at: chrono::DateTime<chrono::Utc>,
    /// Cancelled when the worker engine shuts down. Long-running handlers
    /// should poll it and bail out cleanly.
    pub cancel_token: CancellationToken,
    /// Lets a handler enqueue detached follow-up work without blocking its
    /// own cycle; the dispatcher does not wait on or track such tasks.
    pub submitter: Arc<dyn TaskSubmitter>,
}

/// Trait implemented by every topic handler.
///
/// `handle` receives the deserialized payload mutably and returns normally on
/// success; the (possibly mutated) payload is then written to the topic's
/// complete record. A returned [`HandlerError`] leaves the pending record
/// behind or discards it depending on the dispatcher's persist mode.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &mut Payload, context: TaskContext)
        -> Result<(), HandlerError>;

    /// Topic this handler is registered under.
    fn topic(&self) -> String;
}

/// Explicit topic → handler mapping, populated at startup and queried by the
/// dispatcher. Kept as an owned value rather than a process-wide registry so
/// independent engines can be tested in isolation.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own declared topic, replacing any
    /// previous registration for that topic.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.topic(), handler);
    }

    /// Resolve the handler for `topic`, failing with
    /// [`WorkerError::HandlerNotFound`] before any queue state is touched.
    pub fn resolve(&self, topic: &str) -> Result<Arc<dyn TaskHandler>, WorkerError> {
        self.handlers
            .get(topic)
            .cloned()
            .ok_or_else(|| WorkerError::HandlerNotFound(topic.to_string()))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_flat_json() {
        let raw = r#"{"message": "hello", "number": "+1234567890", "topic": "sample"}"#;
        let envelope: TaskEnvelope = serde_json::from_str(raw).expect("decode");

        assert_eq!(envelope.topic, "sample");
        assert_eq!(envelope.payload["message"], json!("hello"));
        assert_eq!(envelope.payload["number"], json!("+1234567890"));

        let encoded = serde_json::to_string(&envelope).expect("encode");
        let again: TaskEnvelope = serde_json::from_str(&encoded).expect("re-decode");
        assert_eq!(again, envelope);
    }

    #[test]
    fn envelope_preserves_handler_mutations() {
        let mut envelope = TaskEnvelope::new("sample", Payload::new());
        envelope
            .payload
            .insert("final_data".into(), json!("computed"));

        let encoded = serde_json::to_string(&envelope).expect("encode");
        let again: TaskEnvelope = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(again.payload["final_data"], json!("computed"));
    }

    #[test]
    fn registry_resolves_by_topic() {
        use crate::task::error::HandlerError;

        struct Noop;

        #[async_trait]
        impl TaskHandler for Noop {
            async fn handle(
                &self,
                _payload: &mut Payload,
                _context: TaskContext,
            ) -> Result<(), HandlerError> {
                Ok(())
            }

            fn topic(&self) -> String {
                "noop".to_string()
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop));

        assert!(registry.contains("noop"));
        assert!(registry.resolve("noop").is_ok());
        assert!(matches!(
            registry.resolve("missing"),
            Err(WorkerError::HandlerNotFound(topic)) if topic == "missing"
        ));
    }
}
