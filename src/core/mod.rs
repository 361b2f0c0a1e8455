//! Core dispatch, pool, lease and scheduling abstractions.

pub mod cron;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod job;
pub mod launch;
pub mod lease;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod worker_pool;

pub use cron::{CronExpression, NextOccurrence, StandardCron};
pub use dispatcher::{TaskDispatcher, TaskHandle, WaitOutcome};
pub use envelope::{
    BatchStage, ChunkWork, HmacSigner, JobDescriptor, PayloadCodec, TaskDescriptor, TaskState,
    WorkUnit,
};
pub use error::{AppResult, JobError, PayloadError, TaskError};
pub use job::{FnJob, Job, JobContext, JobRegistry};
pub use launch::{Launcher, Spawn};
pub use lease::{force_stop, is_live_value, Lease, RunnerLoop, RunnerPass, ServerHandle, STOPPED_PREFIX};
pub use runner::TaskRunner;
pub use scheduler::{CronScheduler, ScheduleEntry, ScheduleList};
pub use store::KeyValueStore;
pub use worker_pool::{chunk_sizes, PoolHandle, WorkerPool};
