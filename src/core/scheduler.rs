//! Cron scheduler with a persisted schedule list.
//!
//! The whole list lives under one store key as a versioned value. Every
//! change is a conditional write against the value that was read, retried
//! a bounded number of times, so two concurrent passes cannot silently
//! overwrite each other's `times`/`next` updates. Due entries are dispatched
//! only after the write that advanced them succeeded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::cron::NextOccurrence;
use crate::core::lease::{force_stop, Lease, RunnerLoop, RunnerPass, ServerHandle};
use crate::core::{JobDescriptor, Spawn, TaskDispatcher, TaskError, WorkUnit};
use crate::util::{new_task_key, Clock};

/// One recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Unique id.
    pub key: String,
    /// Human label; `has` and `del` accept it in place of the key.
    pub name: String,
    /// Cron expression.
    pub cron: String,
    /// Next due time.
    pub next: DateTime<Utc>,
    /// Remaining runs; `-1` repeats forever.
    pub times: i64,
    /// Whether the entry repeats forever.
    pub loop_forever: bool,
    /// Job run on every fire, with its lifecycle hooks.
    pub work: JobDescriptor,
    /// Run budget of each fire, in seconds.
    pub timeout_secs: u64,
}

impl ScheduleEntry {
    fn matches(&self, key_or_name: &str) -> bool {
        self.key == key_or_name || self.name == key_or_name
    }
}

/// Stored form of the schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleList {
    /// Bumped on every write.
    pub version: u64,
    /// Entries in insertion order.
    pub entries: Vec<ScheduleEntry>,
}

/// Persisted cron scheduler.
#[derive(Clone)]
pub struct CronScheduler {
    dispatcher: TaskDispatcher,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    cron: Arc<dyn NextOccurrence>,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CronScheduler {
    /// Scheduler dispatching through `dispatcher`.
    pub fn new(
        dispatcher: TaskDispatcher,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        cron: Arc<dyn NextOccurrence>,
    ) -> Self {
        Self {
            dispatcher,
            config,
            clock,
            cron,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    async fn load(&self) -> Result<(Option<String>, ScheduleList), TaskError> {
        let runner = self.dispatcher.runner();
        match runner.store().get(&self.config.list_key).await? {
            Some(raw) => {
                let list = runner.codec().decode(&raw)?;
                Ok((Some(raw), list))
            }
            None => Ok((None, ScheduleList::default())),
        }
    }

    async fn mutate<T, F>(&self, mut change: F) -> Result<T, TaskError>
    where
        F: FnMut(&mut ScheduleList) -> T + Send,
        T: Send,
    {
        let runner = self.dispatcher.runner();
        for attempt in 1..=self.config.write_attempts {
            let (raw, mut list) = self.load().await?;
            let out = change(&mut list);
            list.version += 1;
            let encoded = runner.codec().encode(&list)?;
            if runner
                .store()
                .compare_and_swap(&self.config.list_key, raw.as_deref(), Some(encoded), None)
                .await?
            {
                return Ok(out);
            }
            debug!(attempt, "schedule list changed underneath, retrying");
        }
        Err(TaskError::Backend(format!(
            "schedule list write conflicted {} times",
            self.config.write_attempts
        )))
    }

    /// Schedule `work` with the default run budget. See
    /// [`CronScheduler::add_with_timeout`].
    ///
    /// # Errors
    ///
    /// See [`CronScheduler::add_with_timeout`].
    pub async fn add(
        &self,
        cron: &str,
        work: JobDescriptor,
        name: &str,
        times: i64,
    ) -> Result<String, TaskError> {
        let timeout = Duration::from_secs(self.config.default_timeout_secs);
        self.add_with_timeout(cron, work, name, times, timeout).await
    }

    /// Schedule `work` to run `times` times (`-1` forever) on `cron`.
    ///
    /// An empty `cron` dispatches `work` right away without persisting it
    /// and returns an empty key.
    ///
    /// # Errors
    ///
    /// `InvalidCron`, `InvalidConfig` for `times` of 0 or below -1 or a
    /// timeout under one second, dispatch failures for the immediate path,
    /// store failures.
    pub async fn add_with_timeout(
        &self,
        cron: &str,
        work: JobDescriptor,
        name: &str,
        times: i64,
        timeout: Duration,
    ) -> Result<String, TaskError> {
        if cron.is_empty() {
            info!(name = %name, job = %work.job, "running scheduled job now");
            self.dispatcher
                .dispatch_unit(WorkUnit::Scheduled(work), timeout)
                .await?;
            return Ok(String::new());
        }
        if times == 0 || times < -1 {
            return Err(TaskError::InvalidConfig(format!(
                "times must be positive or -1, got {times}"
            )));
        }
        if timeout.as_secs() == 0 {
            return Err(TaskError::InvalidConfig(format!(
                "timeout must be at least one second, got {timeout:?}"
            )));
        }

        let next = self.cron.next_occurrence(cron, self.clock.now())?;
        let entry = ScheduleEntry {
            key: new_task_key(),
            name: name.to_string(),
            cron: cron.to_string(),
            next,
            times,
            loop_forever: times == -1,
            work,
            timeout_secs: timeout.as_secs(),
        };
        let key = entry.key.clone();
        self.mutate(|list| list.entries.push(entry.clone())).await?;
        info!(key = %key, name = %name, next = %next, "scheduled job added");
        Ok(key)
    }

    /// Remove every entry whose key or name equals `key_or_name`. Returns
    /// how many were removed.
    ///
    /// # Errors
    ///
    /// Store or payload failures.
    pub async fn del(&self, key_or_name: &str) -> Result<usize, TaskError> {
        let removed = self
            .mutate(|list| {
                let before = list.entries.len();
                list.entries.retain(|entry| !entry.matches(key_or_name));
                before - list.entries.len()
            })
            .await?;
        info!(key = %key_or_name, removed, "scheduled job removed");
        Ok(removed)
    }

    /// Whether an entry with this key or name exists.
    ///
    /// # Errors
    ///
    /// Store or payload failures.
    pub async fn has(&self, key_or_name: &str) -> Result<bool, TaskError> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|entry| entry.matches(key_or_name)))
    }

    /// Entry with exactly this key.
    ///
    /// # Errors
    ///
    /// Store or payload failures.
    pub async fn get(&self, key: &str) -> Result<Option<ScheduleEntry>, TaskError> {
        Ok(self.list().await?.into_iter().find(|entry| entry.key == key))
    }

    /// All persisted entries.
    ///
    /// # Errors
    ///
    /// Store or payload failures.
    pub async fn list(&self) -> Result<Vec<ScheduleEntry>, TaskError> {
        Ok(self.load().await?.1.entries)
    }

    /// Drop the whole schedule.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn clean(&self) -> Result<(), TaskError> {
        self.dispatcher
            .runner()
            .store()
            .delete(&self.config.list_key)
            .await?;
        info!("schedule cleared");
        Ok(())
    }

    /// One scan: drop exhausted entries, advance due ones and dispatch
    /// them. Returns how many were dispatched.
    ///
    /// # Errors
    ///
    /// Store or payload failures on the list itself; a failed dispatch of
    /// one entry is logged and does not stop the others.
    pub async fn run(&self) -> Result<usize, TaskError> {
        let now = self.clock.now();
        let cron = &self.cron;
        let due = self
            .mutate(|list| {
                let mut due = Vec::new();
                list.entries.retain_mut(|entry| {
                    if entry.times == 0 {
                        info!(key = %entry.key, name = %entry.name, "scheduled job finished");
                        return false;
                    }
                    if entry.next > now {
                        return true;
                    }
                    match cron.next_occurrence(&entry.cron, now) {
                        Ok(next) => entry.next = next,
                        Err(e) => {
                            error!(key = %entry.key, error = %e, "dropping entry with bad cron");
                            return false;
                        }
                    }
                    if entry.times > 0 {
                        entry.times -= 1;
                    }
                    debug!(key = %entry.key, next = %entry.next, times = entry.times, "scheduled job due");
                    due.push(entry.clone());
                    true
                });
                due
            })
            .await?;

        let mut dispatched = 0;
        for entry in due {
            let timeout = Duration::from_secs(entry.timeout_secs);
            match self
                .dispatcher
                .dispatch_unit(WorkUnit::Scheduled(entry.work), timeout)
                .await
            {
                Ok(handle) => {
                    dispatched += 1;
                    debug!(key = %entry.key, task = %handle.key(), "scheduled job dispatched");
                }
                Err(e) => warn!(key = %entry.key, error = %e, "scheduled job dispatch failed"),
            }
        }
        Ok(dispatched)
    }

    /// Start the scheduler server loop unless one is already active.
    ///
    /// # Errors
    ///
    /// Store failures while claiming the lease.
    pub async fn start<S: Spawn>(&self, spawner: &S) -> Result<Option<ServerHandle>, TaskError> {
        let lease = Lease::new(
            self.dispatcher.runner().store().clone(),
            self.config.lease.clone(),
        );
        RunnerLoop::start(spawner, lease, Arc::new(self.clone())).await
    }

    /// Force whichever scheduler server is active to stop.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn stop(&self) -> Result<(), TaskError> {
        force_stop(self.dispatcher.runner().store().as_ref(), &self.config.lease).await
    }
}

#[async_trait]
impl RunnerPass for CronScheduler {
    async fn pass(&self) -> Result<(), TaskError> {
        let dispatched = self.run().await?;
        if dispatched > 0 {
            info!(dispatched, "scheduler pass finished");
        }
        Ok(())
    }

    fn role(&self) -> &'static str {
        "scheduler"
    }
}
