//! Builder assembling the dispatcher, worker pool and scheduler.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::config::{BackgroundConfig, LaunchConfig};
use crate::core::{
    CronScheduler, JobRegistry, KeyValueStore, Launcher, NextOccurrence, PayloadCodec, PoolHandle,
    ServerHandle, StandardCron, TaskDispatcher, TaskRunner, WorkerPool,
};
use crate::core::AppResult;
use crate::infra::InMemoryStore;
use crate::runtime::{InProcessLauncher, LoopbackHandler, ProcessLauncher, TokioSpawner};
use crate::util::{Clock, SystemClock};

/// Builds a [`Background`] from configuration.
///
/// Defaults: in-memory store, system clock, bundled cron parser, launcher
/// chosen by `config.launch`.
///
/// ```rust,ignore
/// let background = BackgroundBuilder::new(BackgroundConfig::from_env()?)
///     .with_store(Arc::new(FileStore::open("/var/lib/app/tasks")?))
///     .with_registry(registry)
///     .build()?;
/// let servers = background.start_servers().await?;
/// ```
pub struct BackgroundBuilder {
    config: BackgroundConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    registry: JobRegistry,
    clock: Arc<dyn Clock>,
    cron: Arc<dyn NextOccurrence>,
    launcher: Option<Arc<dyn Launcher>>,
}

impl BackgroundBuilder {
    /// Builder over `config`.
    #[must_use]
    pub fn new(config: BackgroundConfig) -> Self {
        Self {
            config,
            store: None,
            registry: JobRegistry::new(),
            clock: Arc::new(SystemClock),
            cron: Arc::new(StandardCron),
            launcher: None,
        }
    }

    /// Shared store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Jobs known to this process.
    #[must_use]
    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Clock used by the scheduler.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cron implementation used by the scheduler.
    #[must_use]
    pub fn with_cron(mut self, cron: Arc<dyn NextOccurrence>) -> Self {
        self.cron = cron;
        self
    }

    /// Launcher overriding `config.launch`.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Validate and assemble. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an unusable signing key, a launch mode that is
    /// not compiled in, or no current tokio runtime.
    pub fn build(self) -> AppResult<Background> {
        let config = self.config;
        config.validate().map_err(|e| anyhow!("config invalid: {e}"))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let codec = match &config.signing_key {
            Some(key) => PayloadCodec::signed(key).context("signing key rejected")?,
            None => PayloadCodec::unsigned(),
        };
        let spawner = TokioSpawner::current()?;
        let pool_handle = PoolHandle::new(store.clone(), codec.clone(), &config.pool);
        let runner = TaskRunner::new(store, codec, self.registry, pool_handle);

        let launcher = match self.launcher {
            Some(launcher) => launcher,
            None => launcher_for(&config.launch, &spawner)?,
        };
        info!(
            launcher = launcher.name(),
            jobs = ?runner.registry().names(),
            signed = runner.codec().is_signed(),
            "background components ready"
        );

        let dispatcher = TaskDispatcher::new(runner.clone(), launcher, config.dispatch.clone());
        let pool = WorkerPool::new(dispatcher.clone(), config.pool.clone());
        let scheduler = CronScheduler::new(
            dispatcher.clone(),
            config.scheduler.clone(),
            self.clock,
            self.cron,
        );
        Ok(Background {
            dispatcher,
            pool,
            scheduler,
            runner,
            spawner,
        })
    }
}

fn launcher_for(launch: &LaunchConfig, spawner: &TokioSpawner) -> AppResult<Arc<dyn Launcher>> {
    Ok(match launch {
        LaunchConfig::InProcess => Arc::new(InProcessLauncher::new(spawner.clone())),
        LaunchConfig::Process { program, args } => match program {
            Some(program) => Arc::new(ProcessLauncher::new(program, args.clone())),
            None => Arc::new(ProcessLauncher::current_exe(args.clone())?),
        },
        #[cfg(feature = "loopback")]
        LaunchConfig::Loopback {
            base_url,
            path,
            connect_timeout_ms,
            total_timeout_ms,
        } => Arc::new(crate::runtime::LoopbackLauncher::new(
            base_url,
            path,
            std::time::Duration::from_millis(*connect_timeout_ms),
            std::time::Duration::from_millis(*total_timeout_ms),
        )?),
        #[cfg(not(feature = "loopback"))]
        LaunchConfig::Loopback { .. } => {
            return Err(anyhow!("loopback launch requires the `loopback` feature"))
        }
    })
}

/// Assembled components sharing one store, codec and registry.
#[derive(Debug, Clone)]
pub struct Background {
    dispatcher: TaskDispatcher,
    pool: WorkerPool,
    scheduler: CronScheduler,
    runner: TaskRunner,
    spawner: TokioSpawner,
}

impl Background {
    /// Task dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Worker pool.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Cron scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    /// Executing-side runner.
    #[must_use]
    pub const fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Handler for the loopback endpoint.
    #[must_use]
    pub fn loopback_handler(&self) -> LoopbackHandler<TokioSpawner> {
        LoopbackHandler::new(self.runner.clone(), self.spawner.clone())
    }

    /// Start the pool and scheduler server loops where none is active.
    ///
    /// # Errors
    ///
    /// Store failures while claiming the leases.
    pub async fn start_servers(&self) -> AppResult<BackgroundServers> {
        let pool = self.pool.start(&self.spawner).await?;
        let scheduler = self.scheduler.start(&self.spawner).await?;
        Ok(BackgroundServers { pool, scheduler })
    }
}

/// Server loops started by this process; `None` where another process
/// already runs that role.
#[derive(Debug)]
pub struct BackgroundServers {
    /// Pool server.
    pub pool: Option<ServerHandle>,
    /// Scheduler server.
    pub scheduler: Option<ServerHandle>,
}

impl BackgroundServers {
    /// Stop both loops and wait for them to exit.
    ///
    /// # Errors
    ///
    /// Store failures while releasing the leases.
    pub async fn shutdown(self) -> AppResult<()> {
        for handle in [self.pool, self.scheduler].into_iter().flatten() {
            handle.stop().await?;
            handle.join().await;
        }
        Ok(())
    }
}
