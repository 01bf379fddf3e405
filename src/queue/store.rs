use crate::worker::error::WorkerError;
use async_trait::async_trait;

/// Contract the queue engine requires of the shared key-value store.
///
/// Every operation is single-key atomic at the store level; the engine never
/// assumes cross-key transactions. `pop_front` is the sole serialization
/// point between competing workers — two concurrent callers must never
/// receive the same element, so an implementation may not weaken it into a
/// read followed by a delete.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a value to the tail of the list at `key`.
    async fn push_back(&self, key: &str, value: &str) -> Result<(), WorkerError>;

    /// Atomically remove and return the oldest element of the list at `key`,
    /// or `None` when the list is empty or absent.
    async fn pop_front(&self, key: &str) -> Result<Option<String>, WorkerError>;

    /// Number of elements in the list at `key` (0 when absent).
    async fn list_len(&self, key: &str) -> Result<u64, WorkerError>;

    /// Set `field` to `value` in the hash at `key`.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), WorkerError>;

    /// Read `field` from the hash at `key`.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, WorkerError>;

    /// Remove `field` from the hash at `key`. Removing an absent field is
    /// not an error.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), WorkerError>;

    /// Number of fields in the hash at `key` (0 when absent).
    async fn hash_len(&self, key: &str) -> Result<u64, WorkerError>;
}
