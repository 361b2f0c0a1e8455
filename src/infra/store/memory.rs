//! In-memory store backend.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::core::{KeyValueStore, TaskError};

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store for development and tests.
///
/// Expiry follows the tokio clock, so paused-time tests can fast-forward
/// TTLs. Sibling OS processes do not see this store; pair it with the
/// in-process launcher.
#[derive(Default)]
pub struct InMemoryStore {
    slots: Mutex<BTreeMap<String, Slot>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("keys", &self.slots.lock().len())
            .finish()
    }
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().values().filter(|s| s.is_live(now)).count()
    }

    /// Whether no live key exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_value(slots: &mut BTreeMap<String, Slot>, key: &str) -> Option<String> {
        let now = Instant::now();
        match slots.get(key) {
            Some(slot) if slot.is_live(now) => Some(slot.value.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TaskError> {
        Ok(Self::live_value(&mut self.slots.lock(), key))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), TaskError> {
        self.slots.lock().insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TaskError> {
        self.slots.lock().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, TaskError> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| slot.is_live(now));
        Ok(slots
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<bool, TaskError> {
        let mut slots = self.slots.lock();
        let current = Self::live_value(&mut slots, key);
        if current.as_deref() != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                slots.insert(key.to_string(), Slot::new(value, ttl));
            }
            None => {
                slots.remove(key);
            }
        }
        Ok(true)
    }
}
