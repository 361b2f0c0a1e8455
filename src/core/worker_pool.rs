//! Chunked fan-out/fan-in worker pool and its queued-stage runner.
//!
//! `run_pool` splits a stage's items into `ceil(len / concurrency)`-sized
//! contiguous chunks and dispatches each chunk as its own task. Items inside
//! a chunk run in order; chunks run concurrently. The finish job runs once,
//! on the calling side, after every dispatched chunk has been released.
//!
//! Cancellation is cooperative: both the chunk launcher and each chunk's
//! item loop stop as soon as the pool server lease is gone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::core::lease::{force_stop, is_live_value, Lease, RunnerLoop, RunnerPass, ServerHandle};
use crate::core::{
    BatchStage, ChunkWork, JobDescriptor, KeyValueStore, PayloadCodec, Spawn, TaskDispatcher,
    TaskError, WorkUnit,
};
use crate::util::{new_stage_key, runner_identity};

/// Sizes of the contiguous chunks a stage of `len` items is split into.
///
/// ```
/// use prometheus_background::core::chunk_sizes;
/// assert_eq!(chunk_sizes(10, 4), vec![3, 3, 3, 1]);
/// ```
#[must_use]
pub fn chunk_sizes(len: usize, concurrency: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let size = len.div_ceil(concurrency.max(1));
    let mut sizes = vec![size; len / size];
    if len % size != 0 {
        sizes.push(len % size);
    }
    sizes
}

/// What a running job needs from the pool: queueing stages and liveness.
#[derive(Clone)]
pub struct PoolHandle {
    store: Arc<dyn KeyValueStore>,
    codec: PayloadCodec,
    queue_prefix: String,
    server_key: String,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("queue_prefix", &self.queue_prefix)
            .field("server_key", &self.server_key)
            .finish_non_exhaustive()
    }
}

impl PoolHandle {
    /// Handle over `store` using the pool's key layout.
    pub fn new(store: Arc<dyn KeyValueStore>, codec: PayloadCodec, config: &PoolConfig) -> Self {
        Self {
            store,
            codec,
            queue_prefix: config.queue_prefix.clone(),
            server_key: config.lease.key.clone(),
        }
    }

    /// Queue a stage for the background runner. Returns the stage key.
    ///
    /// # Errors
    ///
    /// Encoding or store failures.
    pub async fn push_stage(
        &self,
        items: Vec<Value>,
        worker: JobDescriptor,
        finish: Option<JobDescriptor>,
    ) -> Result<String, TaskError> {
        let stage = BatchStage {
            items,
            worker,
            finish,
        };
        let key = new_stage_key(&self.queue_prefix);
        let raw = self.codec.encode(&stage)?;
        self.store.set(&key, raw, None).await?;
        info!(key = %key, items = stage.items.len(), worker = %stage.worker.job, "stage queued");
        Ok(key)
    }

    /// Keys of queued stages, oldest key order.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn queued_stages(&self) -> Result<Vec<String>, TaskError> {
        self.store.keys_with_prefix(&self.queue_prefix).await
    }

    /// Whether a pool server currently holds the lease.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn is_server_alive(&self) -> Result<bool, TaskError> {
        Ok(self
            .store
            .get(&self.server_key)
            .await?
            .is_some_and(|value| is_live_value(&value)))
    }
}

/// Fan-out/fan-in executor over the task dispatcher.
#[derive(Clone)]
pub struct WorkerPool {
    dispatcher: TaskDispatcher,
    handle: PoolHandle,
    config: PoolConfig,
    identity: String,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Pool dispatching chunks through `dispatcher`.
    pub fn new(dispatcher: TaskDispatcher, config: PoolConfig) -> Self {
        let handle = dispatcher.runner().pool_handle().clone();
        Self {
            dispatcher,
            handle,
            config,
            identity: runner_identity(),
        }
    }

    /// Handle for queueing stages.
    #[must_use]
    pub const fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Queue a stage for the background runner.
    ///
    /// # Errors
    ///
    /// See [`PoolHandle::push_stage`].
    pub async fn push_stage(
        &self,
        items: Vec<Value>,
        worker: JobDescriptor,
        finish: Option<JobDescriptor>,
    ) -> Result<String, TaskError> {
        self.handle.push_stage(items, worker, finish).await
    }

    /// Run one stage to completion.
    ///
    /// Chunks that fail to dispatch are logged and skipped; the finish job
    /// still runs once every launched chunk is released.
    ///
    /// # Errors
    ///
    /// Store failures, or the finish job's error.
    pub async fn run_pool(
        &self,
        items: Vec<Value>,
        worker: &JobDescriptor,
        finish: Option<&JobDescriptor>,
    ) -> Result<(), TaskError> {
        self.run_stage("pool", items, worker, finish).await
    }

    async fn run_stage(
        &self,
        label: &str,
        items: Vec<Value>,
        worker: &JobDescriptor,
        finish: Option<&JobDescriptor>,
    ) -> Result<(), TaskError> {
        let total = items.len();
        if total > 0 {
            let sizes = chunk_sizes(total, self.config.concurrency);
            info!(
                stage = %label,
                chunk_size = sizes.first().copied().unwrap_or_default(),
                total,
                concurrency = self.config.concurrency,
                "splitting stage"
            );

            let mut launched = Vec::with_capacity(sizes.len());
            let mut rest = items.into_iter();
            let mut base_index = 0;
            for size in sizes {
                if !self.handle.is_server_alive().await? {
                    info!(stage = %label, base_index, "pool server gone, not launching further chunks");
                    break;
                }
                let chunk = ChunkWork {
                    worker: worker.clone(),
                    items: rest.by_ref().take(size).collect(),
                    base_index,
                };
                base_index += size;
                match self
                    .dispatcher
                    .dispatch_unit(WorkUnit::Chunk(chunk), self.config.stage_timeout())
                    .await
                {
                    Ok(handle) => launched.push(handle),
                    Err(e) => error!(stage = %label, error = %e, "chunk could not be dispatched"),
                }
            }

            for handle in &launched {
                self.dispatcher.wait(handle).await?;
            }
            debug!(stage = %label, chunks = launched.len(), "all chunks released");
        }

        if let Some(finish) = finish {
            self.dispatcher.runner().run_job(label, finish).await?;
        }
        Ok(())
    }

    /// One background pass over every queued stage. Returns how many stages
    /// this runner consumed.
    ///
    /// A stage is consumed at most once: it is deleted after running whether
    /// it succeeded or failed. Stages locked by another runner are skipped.
    ///
    /// # Errors
    ///
    /// Store failures while listing, or a terminate signal from a stage.
    pub async fn run(&self) -> Result<usize, TaskError> {
        let store = self.dispatcher.runner().store();
        let lock_ttl = Some(std::time::Duration::from_secs(self.config.lock_ttl_secs));
        let mut consumed = 0;

        for key in self.handle.queued_stages().await? {
            store
                .set(&self.config.lock_key, Utc::now().timestamp().to_string(), lock_ttl)
                .await?;
            let stage_lock = format!("{}/{key}", self.config.lock_key);
            if !store
                .compare_and_swap(&stage_lock, None, Some(self.identity.clone()), lock_ttl)
                .await?
            {
                debug!(key = %key, "stage held by another runner");
                continue;
            }

            let result = self.run_queued(&key).await;

            if let Err(e) = store.delete(&key).await {
                warn!(key = %key, error = %e, "failed to delete stage");
            }
            if let Err(e) = store.delete(&stage_lock).await {
                warn!(key = %key, error = %e, "failed to release stage lock");
            }
            match result {
                Ok(()) => consumed += 1,
                Err(e) if e.is_terminate() => return Err(e),
                Err(TaskError::NotFound(_)) => info!(key = %key, "stage already consumed"),
                Err(e) => {
                    consumed += 1;
                    error!(key = %key, error = %e, "stage failed, discarding");
                }
            }
        }
        Ok(consumed)
    }

    async fn run_queued(&self, key: &str) -> Result<(), TaskError> {
        let store = self.dispatcher.runner().store();
        let raw = store
            .get(key)
            .await?
            .ok_or_else(|| TaskError::NotFound(key.to_string()))?;
        let stage: BatchStage = self.dispatcher.runner().codec().decode(&raw)?;
        self.run_stage(key, stage.items, &stage.worker, stage.finish.as_ref())
            .await
    }

    /// Start the pool server loop unless one is already active.
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

    /// Force whichever pool server is active to stop after its current pass.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn stop(&self) -> Result<(), TaskError> {
        force_stop(self.dispatcher.runner().store().as_ref(), &self.config.lease).await
    }
}

#[async_trait]
impl RunnerPass for WorkerPool {
    async fn pass(&self) -> Result<(), TaskError> {
        let consumed = self.run().await?;
        if consumed > 0 {
            info!(consumed, "pool pass finished");
        }
        Ok(())
    }

    fn role(&self) -> &'static str {
        "pool"
    }
}
