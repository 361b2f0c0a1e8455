//! Worker pool and runner lease configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lease settings for one singleton runner role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Store key holding the lease record.
    pub key: String,
    /// TTL written on every renewal, in milliseconds.
    pub ttl_ms: u64,
    /// TTL written when the lease is first claimed, in milliseconds.
    pub initial_ttl_ms: u64,
    /// Sleep between runner passes, in milliseconds.
    pub interval_ms: u64,
}

impl LeaseConfig {
    /// Lease with the given key and timings.
    pub fn new(key: impl Into<String>, ttl_ms: u64, initial_ttl_ms: u64, interval_ms: u64) -> Self {
        Self {
            key: key.into(),
            ttl_ms,
            initial_ttl_ms,
            interval_ms,
        }
    }

    /// Renewal TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// TTL of the first claim.
    #[must_use]
    pub const fn initial_ttl(&self) -> Duration {
        Duration::from_millis(self.initial_ttl_ms)
    }

    /// Pause between passes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate timings. The TTL must exceed the interval by at least a fifth
    /// so a renewal always lands before expiry.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("lease key must not be empty".into());
        }
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".into());
        }
        let margin = self.interval_ms / 5;
        if self.ttl_ms < self.interval_ms + margin.max(1) {
            return Err(format!(
                "ttl_ms ({}) must exceed interval_ms ({}) by at least {}",
                self.ttl_ms,
                self.interval_ms,
                margin.max(1)
            ));
        }
        if self.initial_ttl_ms < self.ttl_ms {
            return Err("initial_ttl_ms must be at least ttl_ms".into());
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Parallelism budget: number of chunks a stage is split into.
    pub concurrency: usize,
    /// Run budget of each chunk task, in seconds.
    pub stage_timeout_secs: u64,
    /// Store prefix of queued stages.
    pub queue_prefix: String,
    /// Processing lock key; per-stage claims live under `<lock_key>/<stage>`.
    pub lock_key: String,
    /// TTL of the processing lock marker, in seconds.
    pub lock_ttl_secs: u64,
    /// Pool server lease.
    pub lease: LeaseConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get() * 4,
            stage_timeout_secs: 24 * 3600,
            queue_prefix: "pool/".into(),
            lock_key: "pool.lock".into(),
            lock_ttl_secs: 3600,
            lease: LeaseConfig::new("pool_server", 55_000, 60_000, 30_000),
        }
    }
}

impl PoolConfig {
    /// Builder-style concurrency override.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder-style lease override.
    #[must_use]
    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    /// Chunk run budget.
    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        if self.stage_timeout_secs == 0 {
            return Err("stage_timeout_secs must be greater than 0".into());
        }
        if self.queue_prefix.is_empty() {
            return Err("queue_prefix must not be empty".into());
        }
        if self.lock_key.starts_with(&self.queue_prefix) {
            return Err("lock_key must not live under queue_prefix".into());
        }
        self.lease.validate().map_err(|e| format!("pool lease invalid: {e}"))
    }
}
