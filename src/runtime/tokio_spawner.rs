//! Tokio runtime spawner implementation.

use std::future::Future;

use crate::core::{Spawn, TaskError};

/// Tokio-based spawner that runs detached futures on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Spawner over an existing runtime handle.
    #[must_use]
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawner over the runtime this call runs on.
    ///
    /// # Errors
    ///
    /// `TaskError::Launch` outside a tokio runtime.
    pub fn current() -> Result<Self, TaskError> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| TaskError::Launch(e.to_string()))
    }
}

impl Spawn for TokioSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(fut);
    }
}
