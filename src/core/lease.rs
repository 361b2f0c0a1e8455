//! Store-backed leases electing one active background runner per role.
//!
//! A lease is a single key holding the identity of the runner that owns it.
//! Ownership is a soft TTL heuristic, not consensus: a short window of two
//! owners is possible right after expiry.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LeaseConfig;
use crate::core::{KeyValueStore, Spawn, TaskError};
use crate::util::runner_identity;

/// Prefix of the value written by a forced stop.
pub const STOPPED_PREFIX: &str = "stopped:";

/// Whether a lease value denotes a running server.
#[must_use]
pub fn is_live_value(value: &str) -> bool {
    !value.starts_with(STOPPED_PREFIX)
}

/// Overwrite the lease at `config.key` with a stop marker.
///
/// Any process may call this; the owner notices on its next ownership check.
///
/// # Errors
///
/// Store failures.
pub async fn force_stop(store: &dyn KeyValueStore, config: &LeaseConfig) -> Result<(), TaskError> {
    let marker = format!("{STOPPED_PREFIX}{}", Uuid::new_v4().simple());
    store.set(&config.key, marker, Some(config.ttl())).await?;
    info!(key = %config.key, "runner stop requested");
    Ok(())
}

/// One runner's view of a lease key.
#[derive(Clone)]
pub struct Lease {
    store: Arc<dyn KeyValueStore>,
    config: LeaseConfig,
    identity: String,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.config.key)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Lease {
    /// Lease with a fresh identity.
    pub fn new(store: Arc<dyn KeyValueStore>, config: LeaseConfig) -> Self {
        Self {
            store,
            config,
            identity: runner_identity(),
        }
    }

    /// Lease key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.config.key
    }

    /// Identity written into the key while owned.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Timings.
    #[must_use]
    pub const fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Claim the lease if nobody holds it (a stop marker counts as free).
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn try_acquire(&self) -> Result<bool, TaskError> {
        let key = &self.config.key;
        let ttl = Some(self.config.initial_ttl());
        let expected = match self.store.get(key).await? {
            None => None,
            Some(value) if !is_live_value(&value) => Some(value),
            Some(_) => return Ok(false),
        };
        self.store
            .compare_and_swap(key, expected.as_deref(), Some(self.identity.clone()), ttl)
            .await
    }

    /// Extend the TTL; `false` when someone else holds the key now.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn renew(&self) -> Result<bool, TaskError> {
        self.store
            .compare_and_swap(
                &self.config.key,
                Some(&self.identity),
                Some(self.identity.clone()),
                Some(self.config.ttl()),
            )
            .await
    }

    /// Whether the key still holds this identity.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn is_owned(&self) -> Result<bool, TaskError> {
        Ok(self.store.get(&self.config.key).await?.as_deref() == Some(self.identity.as_str()))
    }

    /// Replace this runner's claim with a stop marker. No-op if not owned.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn stop(&self) -> Result<bool, TaskError> {
        let marker = format!("{STOPPED_PREFIX}{}", Uuid::new_v4().simple());
        self.store
            .compare_and_swap(
                &self.config.key,
                Some(&self.identity),
                Some(marker),
                Some(self.config.ttl()),
            )
            .await
    }
}

/// One pass of a background runner.
#[async_trait]
pub trait RunnerPass: Send + Sync + 'static {
    /// Drain whatever is due.
    async fn pass(&self) -> Result<(), TaskError>;

    /// Role name for logs.
    fn role(&self) -> &'static str;
}

/// Lease-guarded loop: renew, pass (renewing alongside it), sleep, repeat
/// while owned.
#[derive(Debug)]
pub struct RunnerLoop;

impl RunnerLoop {
    /// Claim `lease` and spawn the loop. `None` when another runner is active.
    ///
    /// # Errors
    ///
    /// Store failures while claiming.
    pub async fn start<S, P>(
        spawner: &S,
        lease: Lease,
        pass: Arc<P>,
    ) -> Result<Option<ServerHandle>, TaskError>
    where
        S: Spawn,
        P: RunnerPass,
    {
        if !lease.try_acquire().await? {
            info!(role = pass.role(), key = %lease.key(), "runner already active elsewhere");
            return Ok(None);
        }
        info!(role = pass.role(), identity = %lease.identity(), "no runner active, starting one");
        let (done_tx, done_rx) = watch::channel(false);
        let handle = ServerHandle {
            lease: lease.clone(),
            done: done_rx,
        };
        spawner.spawn(async move {
            Self::run(&lease, pass.as_ref()).await;
            let _ = done_tx.send(true);
        });
        Ok(Some(handle))
    }

    async fn run<P: RunnerPass>(lease: &Lease, pass: &P) {
        let role = pass.role();
        loop {
            match lease.renew().await {
                Ok(true) => {}
                Ok(false) => {
                    info!(role, identity = %lease.identity(), "lease lost before pass");
                    break;
                }
                Err(e) => warn!(role, error = %e, "lease renewal failed"),
            }
            let outcome = tokio::select! {
                outcome = pass.pass() => outcome,
                () = Self::heartbeat(lease, role) => Ok(()),
            };
            if let Err(e) = outcome {
                warn!(role, error = %e, "runner pass failed");
            }
            debug!(role, identity = %lease.identity(), "runner is running in the background");
            tokio::time::sleep(lease.config().interval()).await;
            match lease.is_owned().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => warn!(role, error = %e, "lease check failed"),
            }
        }
        info!(role, identity = %lease.identity(), "runner stopped");
    }

    /// Keeps renewing every `interval` while a pass runs. Never completes:
    /// after losing the lease it stops renewing and lets the pass finish.
    async fn heartbeat(lease: &Lease, role: &str) {
        let mut ticker = tokio::time::interval(lease.config().interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match lease.renew().await {
                Ok(true) => debug!(role, identity = %lease.identity(), "lease renewed during pass"),
                Ok(false) => {
                    info!(role, identity = %lease.identity(), "lease lost during pass");
                    break;
                }
                Err(e) => warn!(role, error = %e, "lease renewal failed"),
            }
        }
        std::future::pending::<()>().await;
    }
}

/// Control handle of a started runner loop.
#[derive(Debug)]
pub struct ServerHandle {
    lease: Lease,
    done: watch::Receiver<bool>,
}

impl ServerHandle {
    /// Identity of the runner.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.lease.identity()
    }

    /// Ask the loop to exit after its current iteration.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn stop(&self) -> Result<(), TaskError> {
        if !self.lease.stop().await? {
            debug!(key = %self.lease.key(), "lease already released");
        }
        Ok(())
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for the loop to exit.
    pub async fn join(mut self) {
        while !*self.done.borrow_and_update() {
            if self.done.changed().await.is_err() {
                break;
            }
        }
    }
}
