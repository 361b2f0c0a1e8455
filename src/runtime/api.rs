//! Receiving side of the loopback launch strategy.
//!
//! Host HTTP frameworks route [`LOOPBACK_PATH`] to
//! [`LoopbackHandler::handle`] with the value of the [`TOKEN_HEADER`]
//! header and turn the returned [`LoopbackResponse`] into a reply. The
//! response is produced before the task runs; execution is detached.

use tracing::{error, info};

use crate::core::{Spawn, TaskRunner};

/// Request header carrying the task key.
pub const TOKEN_HEADER: &str = "Token";

/// Default endpoint path.
pub const LOOPBACK_PATH: &str = crate::config::background::DEFAULT_LOOPBACK_PATH;

/// Reply of the loopback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackResponse {
    /// The task was found and detached.
    Accepted,
    /// No pending task under that token: handled, expired or bogus.
    NotFound,
}

impl LoopbackResponse {
    /// HTTP status code.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::Accepted => 202,
            Self::NotFound => 404,
        }
    }

    /// Plain-text body.
    #[must_use]
    pub const fn body(self) -> &'static str {
        match self {
            Self::Accepted => "task accepted",
            Self::NotFound => "task not found",
        }
    }
}

/// Looks a token up and runs the task in the background.
#[derive(Debug, Clone)]
pub struct LoopbackHandler<S> {
    runner: TaskRunner,
    spawner: S,
}

impl<S: Spawn> LoopbackHandler<S> {
    /// Handler executing through `runner` on `spawner`.
    pub const fn new(runner: TaskRunner, spawner: S) -> Self {
        Self { runner, spawner }
    }

    /// Handle one loopback request.
    pub async fn handle(&self, token: Option<&str>) -> LoopbackResponse {
        let token = token.map(str::trim).unwrap_or_default();
        info!(key = %token, "loopback request");
        if token.is_empty() {
            return LoopbackResponse::NotFound;
        }
        match self.runner.peek(token).await {
            Ok(Some(_)) => {
                let runner = self.runner.clone();
                let token = token.to_string();
                self.spawner.spawn(async move {
                    let _ = runner.execute(&token).await;
                });
                LoopbackResponse::Accepted
            }
            Ok(None) => LoopbackResponse::NotFound,
            Err(e) => {
                error!(key = %token, error = %e, "loopback lookup failed");
                LoopbackResponse::NotFound
            }
        }
    }
}
