use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// `persist` controls how the polling loops treat handler failures: `true`
/// leaves a durable, retryable record in the topic's pending hash, `false`
/// discards the task (ephemeral/test mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Topics to poll. Empty means "every registered handler's topic".
    pub topics: Vec<String>,
    pub redis_url: String,
    pub persist: bool,
    /// Initial sleep after an empty poll, doubled per idle poll.
    pub poll_backoff_ms: u64,
    /// Ceiling for the idle-poll sleep.
    pub poll_backoff_max_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            persist: true,
            poll_backoff_ms: 100,
            poll_backoff_max_ms: 5_000,
        }
    }
}
