//! Job trait, execution context and the name-to-job registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::{JobError, PoolHandle, TaskError};

/// Everything a job sees when it is invoked.
///
/// Pool workers additionally get the item and its position in the stage.
#[derive(Debug, Clone)]
pub struct JobContext {
    task_key: String,
    args: Value,
    item: Option<(Value, usize)>,
    pool: PoolHandle,
}

impl JobContext {
    /// Context for a plain or scheduled invocation.
    #[must_use]
    pub fn new(task_key: impl Into<String>, args: Value, pool: PoolHandle) -> Self {
        Self {
            task_key: task_key.into(),
            args,
            item: None,
            pool,
        }
    }

    /// Context for one pool worker call.
    #[must_use]
    pub fn with_item(mut self, item: Value, index: usize) -> Self {
        self.item = Some((item, index));
        self
    }

    /// Key of the task descriptor being executed.
    #[must_use]
    pub fn task_key(&self) -> &str {
        &self.task_key
    }

    /// Decode the job arguments.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidArgs` if the arguments do not match `T`.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.args.clone()).map_err(|e| JobError::InvalidArgs(e.to_string()))
    }

    /// Raw JSON arguments.
    #[must_use]
    pub const fn raw_args(&self) -> &Value {
        &self.args
    }

    /// Decode the pool item for this call.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidArgs` outside a pool worker call or when the
    /// item does not match `T`.
    pub fn item<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        let (item, _) = self
            .item
            .as_ref()
            .ok_or_else(|| JobError::InvalidArgs("no pool item in this context".into()))?;
        serde_json::from_value(item.clone()).map_err(|e| JobError::InvalidArgs(e.to_string()))
    }

    /// Position of the item within its stage, for pool worker calls.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.item.as_ref().map(|(_, index)| *index)
    }

    /// Handle for queuing follow-up stages.
    #[must_use]
    pub const fn pool(&self) -> &PoolHandle {
        &self.pool
    }
}

/// A unit of work that can be executed out of band.
///
/// `run` is the start hook. For scheduled work the runner calls `on_abort`
/// when `run` fails and always calls `on_stop` afterwards.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_background::core::{Job, JobContext, JobError};
///
/// struct SendDigest;
///
/// #[async_trait]
/// impl Job for SendDigest {
///     async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
///         let user: String = ctx.args()?;
///         tracing::info!(%user, "sending digest");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Execute the job.
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Called with the error when a scheduled run fails.
    async fn on_abort(&self, _ctx: &JobContext, _error: &JobError) {}

    /// Called last for every scheduled run, success or failure.
    async fn on_stop(&self, _ctx: &JobContext) {}
}

/// Adapter turning an async closure into a [`Job`].
pub struct FnJob<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        (self.f)(ctx.clone()).await
    }
}

/// Registry mapping job names to executors.
///
/// Both the dispatching and the executing process must register the same
/// names; payloads only carry the name and arguments.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

impl JobRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under `name`.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::DuplicateJob` if `name` is taken.
    pub fn register(&mut self, name: impl Into<String>, job: impl Job) -> Result<(), TaskError> {
        let name = name.into();
        if self.jobs.contains_key(&name) {
            return Err(TaskError::DuplicateJob(name));
        }
        self.jobs.insert(name, Arc::new(job));
        Ok(())
    }

    /// Register an async closure under `name`.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::DuplicateJob` if `name` is taken.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), TaskError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.register(name, FnJob { f })
    }

    /// Look up a job.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }
}
