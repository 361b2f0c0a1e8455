//! Launch strategies: in-process task, sibling process, loopback request.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::{Launcher, Spawn, TaskError, TaskRunner};

/// Environment variable carrying the task key into a child process.
pub const TOKEN_ENV: &str = "BACKGROUND_TASK_TOKEN";

/// Runs the task on a detached future in this process.
#[derive(Debug, Clone)]
pub struct InProcessLauncher<S> {
    spawner: S,
}

impl<S> InProcessLauncher<S> {
    /// Launcher spawning onto `spawner`.
    pub const fn new(spawner: S) -> Self {
        Self { spawner }
    }
}

#[async_trait]
impl<S> Launcher for InProcessLauncher<S>
where
    S: Spawn + Send + Sync + 'static,
{
    async fn launch(&self, token: &str, runner: &TaskRunner) -> Result<(), TaskError> {
        let runner = runner.clone();
        let token = token.to_string();
        self.spawner.spawn(async move {
            // Outcome is logged by the runner.
            let _ = runner.execute(&token).await;
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

/// Starts `program args.. <token>` as a sibling process and never waits on it.
///
/// The child must share the store and the job registry; it picks the key up
/// with [`ProcessLauncher::execute_from_env`] or from its last argument.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Launcher running `program` with `args` before the token.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Launcher re-running the current executable.
    ///
    /// # Errors
    ///
    /// `TaskError::Launch` if the executable path is unavailable.
    pub fn current_exe(args: Vec<String>) -> Result<Self, TaskError> {
        let program = std::env::current_exe().map_err(|e| TaskError::Launch(e.to_string()))?;
        Ok(Self::new(program, args))
    }

    /// Child side: run the task named by [`TOKEN_ENV`], if set.
    ///
    /// Returns `false` when this process was not launched for a task.
    ///
    /// # Errors
    ///
    /// Whatever [`TaskRunner::execute`] reports.
    pub async fn execute_from_env(runner: &TaskRunner) -> Result<bool, TaskError> {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.is_empty() => {
                runner.execute(&token).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, token: &str, _runner: &TaskRunner) -> Result<(), TaskError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(token)
            .env(TOKEN_ENV, token)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| TaskError::Launch(format!("{}: {e}", self.program.display())))?;
        info!(key = %token, pid = ?child.id(), "task process started");

        let token = token.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(key = %token, "task process exited"),
                Ok(status) => warn!(key = %token, %status, "task process failed"),
                Err(e) => warn!(key = %token, error = %e, "task process lost"),
            }
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[cfg(feature = "loopback")]
pub use loopback::LoopbackLauncher;

#[cfg(feature = "loopback")]
mod loopback {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tracing::{debug, info};

    use crate::core::{Launcher, TaskError, TaskRunner};
    use crate::runtime::api::TOKEN_HEADER;

    /// Fires a short request at this deployment's loopback endpoint.
    ///
    /// Only reaching the endpoint matters: a request that connects and then
    /// runs out of its total budget still counts as launched.
    #[derive(Debug, Clone)]
    pub struct LoopbackLauncher {
        client: reqwest::Client,
        url: String,
    }

    impl LoopbackLauncher {
        /// Launcher posting to `base_url` + `path`.
        ///
        /// # Errors
        ///
        /// `TaskError::InvalidConfig` if the HTTP client cannot be built.
        pub fn new(
            base_url: &str,
            path: &str,
            connect_timeout: Duration,
            total_timeout: Duration,
        ) -> Result<Self, TaskError> {
            let client = reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .timeout(total_timeout)
                .build()
                .map_err(|e| TaskError::InvalidConfig(e.to_string()))?;
            Ok(Self {
                client,
                url: format!("{}{path}", base_url.trim_end_matches('/')),
            })
        }

        /// Endpoint URL.
        #[must_use]
        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[async_trait]
    impl Launcher for LoopbackLauncher {
        async fn launch(&self, token: &str, _runner: &TaskRunner) -> Result<(), TaskError> {
            info!(key = %token, url = %self.url, "starting task via loopback");
            match self
                .client
                .post(&self.url)
                .header(TOKEN_HEADER, token)
                .send()
                .await
            {
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    Err(TaskError::Launch("task not found".into()))
                }
                Ok(resp) if !resp.status().is_success() => {
                    Err(TaskError::Launch(format!("endpoint answered {}", resp.status())))
                }
                Ok(_) => Ok(()),
                Err(e) if e.is_timeout() && !e.is_connect() => {
                    debug!(key = %token, "loopback request timed out after connecting");
                    Ok(())
                }
                Err(e) => Err(TaskError::Launch(e.to_string())),
            }
        }

        fn name(&self) -> &'static str {
            "loopback"
        }
    }
}
