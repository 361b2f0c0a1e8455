//! Task dispatcher: store a work unit under a fresh key and launch it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::core::{
    JobDescriptor, Launcher, TaskDescriptor, TaskError, TaskRunner, TaskState, WorkUnit,
};
use crate::util::new_task_key;

/// Handle to a dispatched task; the key is also its completion token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    key: String,
    timeout: Duration,
}

impl TaskHandle {
    /// Store key of the descriptor.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run budget the task was dispatched with.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// How a `wait` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The key is gone: the task finished, failed or expired.
    Released,
    /// The wait ceiling elapsed with the key still present.
    GaveUp,
}

/// Registers work units in the store and hands them to a [`Launcher`].
#[derive(Clone)]
pub struct TaskDispatcher {
    runner: TaskRunner,
    launcher: Arc<dyn Launcher>,
    config: DispatchConfig,
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("launcher", &self.launcher.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskDispatcher {
    /// Create a dispatcher sharing `runner`'s store and codec.
    pub fn new(runner: TaskRunner, launcher: Arc<dyn Launcher>, config: DispatchConfig) -> Self {
        Self {
            runner,
            launcher,
            config,
        }
    }

    /// Executing-side runner.
    #[must_use]
    pub const fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch a job with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`TaskDispatcher::dispatch_unit`].
    pub async fn dispatch(&self, job: JobDescriptor) -> Result<TaskHandle, TaskError> {
        self.dispatch_unit(WorkUnit::Task(job), self.config.default_timeout())
            .await
    }

    /// Dispatch a job with an explicit run budget.
    ///
    /// # Errors
    ///
    /// See [`TaskDispatcher::dispatch_unit`].
    pub async fn dispatch_with_timeout(
        &self,
        job: JobDescriptor,
        timeout: Duration,
    ) -> Result<TaskHandle, TaskError> {
        self.dispatch_unit(WorkUnit::Task(job), timeout).await
    }

    /// Store `unit` under a fresh key and launch it.
    ///
    /// A failed attempt removes its own descriptor and retries with a new
    /// key, up to `max_retries` extra attempts. The timeout is kept in whole
    /// seconds so the store TTL, the claim TTL and the run budget agree.
    ///
    /// # Errors
    ///
    /// `DispatchFailure` once every attempt failed, `Payload` when the unit
    /// cannot be encoded (never retried), `InvalidConfig` for a timeout
    /// under one second.
    pub async fn dispatch_unit(
        &self,
        unit: WorkUnit,
        timeout: Duration,
    ) -> Result<TaskHandle, TaskError> {
        if timeout.as_secs() == 0 {
            return Err(TaskError::InvalidConfig(format!(
                "task timeout must be at least one second, got {timeout:?}"
            )));
        }
        let timeout = Duration::from_secs(timeout.as_secs());
        let store = self.runner.store();
        let codec = self.runner.codec();
        let attempts = self.config.max_retries.saturating_add(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let key = new_task_key();
            let descriptor = TaskDescriptor {
                key: key.clone(),
                unit: unit.clone(),
                timeout_secs: timeout.as_secs(),
                state: TaskState::Pending,
                created_at: Utc::now(),
            };
            let raw = codec.encode(&descriptor).map_err(|e| {
                error!(job = %unit.job_name(), error = %e, "cannot encode work unit");
                TaskError::from(e)
            })?;

            if let Err(e) = store.set(&key, raw.clone(), Some(timeout)).await {
                warn!(key = %key, attempt, error = %e, "failed to store task");
                reason = e.to_string();
                continue;
            }
            debug!(key = %key, attempt, launcher = self.launcher.name(), "launching task");

            match self.launcher.launch(&key, &self.runner).await {
                Ok(()) => {
                    info!(key = %key, job = %unit.job_name(), timeout_secs = timeout.as_secs(), "task dispatched");
                    return Ok(TaskHandle { key, timeout });
                }
                Err(e) => {
                    warn!(key = %key, attempt, error = %e, "task launch failed");
                    reason = e.to_string();
                    if let Err(e) = store.compare_and_swap(&key, Some(&raw), None, None).await {
                        warn!(key = %key, error = %e, "failed to withdraw task");
                    }
                }
            }
        }

        error!(attempts, reason = %reason, job = %unit.job_name(), "dispatch failed");
        Err(TaskError::DispatchFailure { attempts, reason })
    }

    /// Block until the task's key disappears or the wait ceiling elapses.
    ///
    /// Success and expiry look the same from here.
    ///
    /// # Errors
    ///
    /// Store failures while polling.
    pub async fn wait(&self, handle: &TaskHandle) -> Result<WaitOutcome, TaskError> {
        self.wait_key(handle.key(), self.config.wait_ceiling()).await
    }

    /// Poll `key` until it is absent, giving up after `ceiling`.
    ///
    /// # Errors
    ///
    /// Store failures while polling.
    pub async fn wait_key(&self, key: &str, ceiling: Duration) -> Result<WaitOutcome, TaskError> {
        let deadline = Instant::now() + ceiling;
        loop {
            if self.runner.store().get(key).await?.is_none() {
                return Ok(WaitOutcome::Released);
            }
            if Instant::now() >= deadline {
                warn!(key = %key, "gave up waiting for task");
                return Ok(WaitOutcome::GaveUp);
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}
