//! Spawn primitives that start a dispatched task out of band.

use std::future::Future;

use async_trait::async_trait;

use crate::core::{TaskError, TaskRunner};

/// Abstraction over an async task spawner.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Starts execution of a stored task descriptor identified by `token`.
///
/// A launcher only has to *start* the work. Returning `Ok` means the
/// executing side was reached; completion is observed through the store.
/// Returning `Err` makes the dispatcher retry with a fresh descriptor.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Hand the task keyed by `token` to the executing side.
    async fn launch(&self, token: &str, runner: &TaskRunner) -> Result<(), TaskError>;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;
}
