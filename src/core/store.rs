//! Shared key-value store abstraction.
//!
//! The store is the only state shared between the dispatching side and the
//! executing side. Implementations must be process-shared for the process and
//! loopback launchers to work; [`crate::infra::InMemoryStore`] is only shared
//! within one process.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::TaskError;

/// Key-value store with per-key TTL and a single conditional write.
///
/// No transactional guarantees are assumed across keys. The only atomic
/// primitive is [`KeyValueStore::compare_and_swap`] on a single key.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, TaskError>;

    /// Write a value. `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), TaskError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), TaskError>;

    /// All live keys starting with `prefix`, in lexical order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, TaskError>;

    /// Atomically replace the value of `key` if it currently equals `expected`.
    ///
    /// `expected = None` means "key must be absent"; `new = None` deletes the
    /// key. Returns `true` when the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<bool, TaskError>;
}
