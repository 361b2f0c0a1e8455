//! Error types for dispatch, payload handling and job execution.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the dispatcher, pool, scheduler and store adapters.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Every dispatch attempt failed; the work unit was never scheduled.
    #[error("dispatch failed after {attempts} attempts: {reason}")]
    DispatchFailure {
        /// Number of attempts made (first try plus retries).
        attempts: u32,
        /// Reason reported by the last attempt.
        reason: String,
    },
    /// Encoding or decoding a work unit failed.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
    /// Descriptor or stage was absent: already handled or expired.
    #[error("not found: {0}")]
    NotFound(String),
    /// The invoked work unit reported a failure.
    #[error("work unit failed: {0}")]
    WorkUnit(#[from] JobError),
    /// A job asked for the surrounding request or pass to stop.
    #[error("terminated: {0}")]
    Terminated(String),
    /// The spawn primitive could not start the work unit.
    #[error("launch error: {0}")]
    Launch(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A cron expression did not parse or never fires.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    /// A job name was registered twice.
    #[error("job `{0}` is already registered")]
    DuplicateJob(String),
}

/// Errors raised while turning work units into bytes and back.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The value could not be serialized.
    #[error("serialize: {0}")]
    Serialize(String),
    /// The stored bytes could not be deserialized.
    #[error("deserialize: {0}")]
    Deserialize(String),
    /// Signing was requested but no secret key is configured.
    #[error("no secret key configured for signing")]
    MissingSecretKey,
    /// The payload signature is missing or does not verify.
    #[error("invalid payload signature")]
    InvalidSignature,
    /// The payload names a job that is not registered.
    #[error("unknown job `{0}`")]
    UnknownJob(String),
}

/// Errors returned by job implementations.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job failed with a message.
    #[error("{0}")]
    Failed(String),
    /// The job arguments or item could not be decoded.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    /// The job ran past its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Control-flow signal that must propagate past stage and lifecycle boundaries.
    #[error("terminate: {0}")]
    Terminate(String),
}

impl JobError {
    /// Shorthand for [`JobError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Whether this error is the terminate signal.
    #[must_use]
    pub const fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate(_))
    }
}

impl TaskError {
    /// Whether this error is (or wraps) the terminate signal.
    #[must_use]
    pub const fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminated(_) | Self::WorkUnit(JobError::Terminate(_)))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
