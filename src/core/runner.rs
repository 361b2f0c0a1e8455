//! Executing side: claims stored descriptors and invokes their work units.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::{
    ChunkWork, JobContext, JobDescriptor, JobError, JobRegistry, KeyValueStore, PayloadCodec,
    PayloadError, PoolHandle, TaskDescriptor, TaskError, TaskState, WorkUnit,
};

struct RunnerInner {
    store: Arc<dyn KeyValueStore>,
    codec: PayloadCodec,
    registry: JobRegistry,
    pool: PoolHandle,
}

/// Claims task descriptors from the store and runs them.
///
/// Every process that may execute work (the dispatcher's own process for
/// in-process launch, sibling processes, loopback endpoints) holds one of
/// these with the same job registry and codec as the dispatching side.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("registry", &self.inner.registry)
            .field("signed", &self.inner.codec.is_signed())
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    /// Create a runner over `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: PayloadCodec,
        registry: JobRegistry,
        pool: PoolHandle,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                store,
                codec,
                registry,
                pool,
            }),
        }
    }

    /// Shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    /// Payload codec.
    #[must_use]
    pub fn codec(&self) -> &PayloadCodec {
        &self.inner.codec
    }

    /// Handle passed to jobs for recursive staging.
    #[must_use]
    pub fn pool_handle(&self) -> &PoolHandle {
        &self.inner.pool
    }

    /// Job registry.
    #[must_use]
    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    /// Read a descriptor that is still pending, without claiming it.
    ///
    /// # Errors
    ///
    /// Store failures and undecodable payloads.
    pub async fn peek(&self, key: &str) -> Result<Option<TaskDescriptor>, TaskError> {
        let Some(raw) = self.inner.store.get(key).await? else {
            return Ok(None);
        };
        let descriptor: TaskDescriptor = self.inner.codec.decode(&raw)?;
        Ok((descriptor.state == TaskState::Pending).then_some(descriptor))
    }

    /// Claim the descriptor under `key`, run it and delete the key.
    ///
    /// At most one caller wins the claim; everyone else gets
    /// `TaskError::NotFound`, meaning "already handled or expired". A payload
    /// that fails to decode is discarded. Ordinary job failures are logged and
    /// returned as `TaskError::WorkUnit`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Payload`, `WorkUnit`, or a store failure.
    pub async fn execute(&self, key: &str) -> Result<(), TaskError> {
        let store = &self.inner.store;
        let Some(raw) = store.get(key).await? else {
            info!(key = %key, "task not found, already handled or expired");
            return Err(TaskError::NotFound(key.to_string()));
        };
        let descriptor: TaskDescriptor = match self.inner.codec.decode(&raw) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!(key = %key, error = %e, "discarding undecodable task");
                store.compare_and_swap(key, Some(&raw), None, None).await?;
                return Err(e.into());
            }
        };
        if descriptor.state != TaskState::Pending {
            info!(key = %key, "task already claimed");
            return Err(TaskError::NotFound(key.to_string()));
        }

        let timeout = Duration::from_secs(descriptor.timeout_secs);
        let claimed = self.inner.codec.encode(&descriptor.claimed())?;
        if !store
            .compare_and_swap(key, Some(&raw), Some(claimed), Some(timeout))
            .await?
        {
            info!(key = %key, "lost claim race for task");
            return Err(TaskError::NotFound(key.to_string()));
        }

        debug!(key = %key, job = %descriptor.unit.job_name(), "task claimed");
        let outcome = self.run_within(key, &descriptor.unit, timeout).await;

        if let Err(e) = store.delete(key).await {
            warn!(key = %key, error = %e, "failed to delete finished task");
        }
        match &outcome {
            Ok(()) => info!(key = %key, "task finished"),
            Err(e) if e.is_terminate() => info!(key = %key, "task requested termination"),
            Err(TaskError::Payload(e)) => error!(key = %key, error = %e, "task payload rejected"),
            Err(e) => warn!(key = %key, error = %e, "task failed"),
        }
        outcome
    }

    /// Invoke a work unit directly, without a stored descriptor.
    ///
    /// # Errors
    ///
    /// `Payload(UnknownJob)` for unregistered names, `WorkUnit` for job errors.
    pub async fn run_unit(&self, key: &str, unit: &WorkUnit) -> Result<(), TaskError> {
        match unit {
            WorkUnit::Task(job) => self.run_job(key, job).await,
            WorkUnit::Scheduled(job) => self.run_scheduled(key, job, None).await,
            WorkUnit::Chunk(chunk) => self.run_chunk(key, chunk).await,
        }
    }

    /// Like [`TaskRunner::run_unit`] with a run budget. For scheduled jobs
    /// only `run` is bounded, so the lifecycle hooks still fire on timeout.
    async fn run_within(
        &self,
        key: &str,
        unit: &WorkUnit,
        budget: Duration,
    ) -> Result<(), TaskError> {
        match unit {
            WorkUnit::Scheduled(job) => self.run_scheduled(key, job, Some(budget)).await,
            other => tokio::time::timeout(budget, self.run_unit(key, other))
                .await
                .unwrap_or_else(|_| Err(TaskError::WorkUnit(JobError::Timeout(budget)))),
        }
    }

    /// Run one job once.
    ///
    /// # Errors
    ///
    /// `Payload(UnknownJob)` or the job's own error.
    pub async fn run_job(&self, key: &str, job: &JobDescriptor) -> Result<(), TaskError> {
        let (handler, ctx) = self.resolve(key, job)?;
        handler.run(&ctx).await.map_err(TaskError::from)
    }

    async fn run_scheduled(
        &self,
        key: &str,
        job: &JobDescriptor,
        budget: Option<Duration>,
    ) -> Result<(), TaskError> {
        let (handler, ctx) = self.resolve(key, job)?;
        let result = match budget {
            Some(budget) => tokio::time::timeout(budget, handler.run(&ctx))
                .await
                .unwrap_or_else(|_| Err(JobError::Timeout(budget))),
            None => handler.run(&ctx).await,
        };
        if let Err(e) = &result {
            warn!(key = %key, job = %job.job, error = %e, "scheduled job aborted");
            handler.on_abort(&ctx, e).await;
        }
        handler.on_stop(&ctx).await;
        match result {
            Err(e) if e.is_terminate() => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn run_chunk(&self, key: &str, chunk: &ChunkWork) -> Result<(), TaskError> {
        let (handler, ctx) = self.resolve(key, &chunk.worker)?;
        for (offset, item) in chunk.items.iter().enumerate() {
            let index = chunk.base_index + offset;
            if !self.inner.pool.is_server_alive().await? {
                info!(key = %key, index, "pool server gone, leaving chunk early");
                break;
            }
            let item_ctx = ctx.clone().with_item(item.clone(), index);
            match handler.run(&item_ctx).await {
                Ok(()) => {}
                Err(e) if e.is_terminate() => return Err(e.into()),
                Err(e) => warn!(key = %key, index, error = %e, "pool item failed"),
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        key: &str,
        job: &JobDescriptor,
    ) -> Result<(Arc<dyn crate::core::Job>, JobContext), TaskError> {
        let handler = self
            .inner
            .registry
            .get(&job.job)
            .ok_or_else(|| PayloadError::UnknownJob(job.job.clone()))?;
        let ctx = JobContext::new(key, job.args.clone(), self.inner.pool.clone());
        Ok((handler, ctx))
    }
}
