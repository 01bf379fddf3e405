//! taskwire: a Redis-backed topic task queue for Rust
//!
//! Producers push JSON task envelopes onto a per-topic submitted list in a
//! shared key-value store; workers claim one envelope at a time, dispatch it
//! to the handler registered for its topic, and record the outcome. A task
//! moves submitted → pending → complete (or failed), with a fresh identifier
//! minted at claim time linking its in-flight and finished records. Because
//! the pending record is written before the handler runs, a worker crash
//! never silently loses a task, and the store's atomic pop means concurrent
//! workers never claim the same envelope twice.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde_json::json;
//! use std::sync::Arc;
//! use taskwire::{
//!     HandlerError, Payload, TaskContext, TaskEnvelope, TaskHandler, WorkerEngine,
//! };
//!
//! struct SmsHandler;
//!
//! #[async_trait]
//! impl TaskHandler for SmsHandler {
//!     async fn handle(
//!         &self,
//!         payload: &mut Payload,
//!         _context: TaskContext,
//!     ) -> Result<(), HandlerError> {
//!         let message = payload
//!             .get("message")
//!             .and_then(|v| v.as_str())
//!             .ok_or_else(|| HandlerError::Fatal("missing message".into()))?
//!             .to_string();
//!         payload.insert("final_data".into(), json!(message));
//!         Ok(())
//!     }
//!
//!     fn topic(&self) -> String {
//!         "sample".to_string()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = WorkerEngine::builder()
//!         .redis_url("redis://127.0.0.1:6379")
//!         .topics(["sample"])
//!         .build()
//!         .await?;
//!     engine.register_handler(Arc::new(SmsHandler));
//!
//!     // Producer side: push an envelope onto sample.submitted
//!     let queue = engine.queue();
//!     let payload: Payload = [
//!         ("message".to_string(), json!("hello")),
//!         ("number".to_string(), json!("+1234567890")),
//!     ]
//!     .into_iter()
//!     .collect();
//!     queue.submit(&TaskEnvelope::new("sample", payload)).await?;
//!
//!     // Worker side: one explicit cycle; `start()` runs this in a loop
//!     let task_id = engine.work("sample", true).await?;
//!     let done = queue.fetch_complete("sample", task_id).await?;
//!     println!("completed: {:?}", done);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod queue;
pub mod task;
pub mod worker;

// Re-export main types for easy access
pub use crate::config::WorkerConfig;
pub use crate::queue::memory::MemoryStore;
pub use crate::queue::queue::{QueueStats, TaskQueue, TaskSubmitter};
pub use crate::queue::redis::{create_redis_pool, RedisConfig, RedisStore};
pub use crate::queue::store::QueueStore;
pub use crate::task::error::{HandlerError, RetryableError};
pub use crate::task::task::{HandlerRegistry, Payload, TaskContext, TaskEnvelope, TaskHandler};
pub use crate::worker::dispatcher::Dispatcher;
pub use crate::worker::error::WorkerError;
pub use crate::worker::worker::{MetricsSink, NoopMetrics, WorkerEngine, WorkerEngineBuilder};
