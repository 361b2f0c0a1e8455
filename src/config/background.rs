//! Dispatch, launch, scheduler and root configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{LeaseConfig, PoolConfig};
use crate::core::AppResult;

/// Loopback endpoint path used when none is configured.
pub const DEFAULT_LOOPBACK_PATH: &str = "/task/start";

/// Task dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Run budget and descriptor TTL when the caller gives none, in seconds.
    pub default_timeout_secs: u64,
    /// Extra attempts after the first failed dispatch.
    pub max_retries: u32,
    /// Poll cadence of `wait`, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on a single `wait`, in seconds.
    pub wait_ceiling_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            max_retries: 10,
            poll_interval_ms: 1000,
            wait_ceiling_secs: 24 * 3600,
        }
    }
}

impl DispatchConfig {
    /// Default run budget.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Poll cadence.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wait ceiling.
    #[must_use]
    pub const fn wait_ceiling(&self) -> Duration {
        Duration::from_secs(self.wait_ceiling_secs)
    }

    /// Validate dispatcher values.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout_secs == 0 {
            return Err("default_timeout_secs must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.wait_ceiling_secs == 0 {
            return Err("wait_ceiling_secs must be greater than 0".into());
        }
        Ok(())
    }
}

/// How dispatched work is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LaunchConfig {
    /// Detached tokio task in this process.
    InProcess,
    /// Sibling OS process that receives the task key as its last argument.
    Process {
        /// Program to run; the current executable when unset.
        #[serde(default)]
        program: Option<String>,
        /// Arguments placed before the task key.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Fire-and-forget call to the loopback endpoint.
    Loopback {
        /// Base URL of this deployment, e.g. `http://127.0.0.1:8080`.
        base_url: String,
        /// Endpoint path.
        #[serde(default = "default_loopback_path")]
        path: String,
        /// Connect budget, in milliseconds.
        #[serde(default = "default_loopback_budget")]
        connect_timeout_ms: u64,
        /// Total request budget, in milliseconds.
        #[serde(default = "default_loopback_budget")]
        total_timeout_ms: u64,
    },
}

fn default_loopback_path() -> String {
    DEFAULT_LOOPBACK_PATH.into()
}

const fn default_loopback_budget() -> u64 {
    3000
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::InProcess
    }
}

impl LaunchConfig {
    /// Loopback launch against `base_url` with the default path and budgets.
    pub fn loopback(base_url: impl Into<String>) -> Self {
        Self::Loopback {
            base_url: base_url.into(),
            path: default_loopback_path(),
            connect_timeout_ms: default_loopback_budget(),
            total_timeout_ms: default_loopback_budget(),
        }
    }

    /// Validate launch values.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::InProcess => Ok(()),
            Self::Process { program, .. } => match program {
                Some(p) if p.is_empty() => Err("process program must not be empty".into()),
                _ => Ok(()),
            },
            Self::Loopback {
                base_url,
                path,
                connect_timeout_ms,
                total_timeout_ms,
            } => {
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    return Err(format!("loopback base_url `{base_url}` must be http(s)"));
                }
                if !path.starts_with('/') {
                    return Err("loopback path must start with `/`".into());
                }
                if *connect_timeout_ms == 0 || *total_timeout_ms == 0 {
                    return Err("loopback budgets must be greater than 0".into());
                }
                Ok(())
            }
        }
    }
}

/// Cron scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Store key holding the schedule list.
    pub list_key: String,
    /// Run budget of scheduled work when none is given, in seconds.
    pub default_timeout_secs: u64,
    /// Attempts of a conditional list write before giving up.
    pub write_attempts: u32,
    /// Scheduler server lease.
    pub lease: LeaseConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            list_key: "tasker_list".into(),
            default_timeout_secs: 300,
            write_attempts: 5,
            lease: LeaseConfig::new("tasker_server", 15_000, 20_000, 10_000),
        }
    }
}

impl SchedulerConfig {
    /// Builder-style lease override.
    #[must_use]
    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    /// Validate scheduler values.
    pub fn validate(&self) -> Result<(), String> {
        if self.list_key.is_empty() {
            return Err("list_key must not be empty".into());
        }
        if self.default_timeout_secs == 0 {
            return Err("default_timeout_secs must be greater than 0".into());
        }
        if self.write_attempts == 0 {
            return Err("write_attempts must be greater than 0".into());
        }
        self.lease
            .validate()
            .map_err(|e| format!("scheduler lease invalid: {e}"))
    }
}

/// Root configuration passed to the builder.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Dispatcher settings.
    pub dispatch: DispatchConfig,
    /// Worker pool settings.
    pub pool: PoolConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Launch strategy.
    pub launch: LaunchConfig,
    /// HMAC key for payload signing; unsigned when absent.
    pub signing_key: Option<String>,
}

impl BackgroundConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.dispatch
            .validate()
            .map_err(|e| format!("dispatch invalid: {e}"))?;
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.launch
            .validate()
            .map_err(|e| format!("launch invalid: {e}"))?;
        if self.pool.lease.key == self.scheduler.lease.key {
            return Err("pool and scheduler leases must use different keys".into());
        }
        if matches!(&self.signing_key, Some(k) if k.is_empty()) {
            return Err("signing_key must not be empty when set".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with `BACKGROUND_*` variables, after loading `.env`.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let cfg = Self::default()
            .overlay(|name| std::env::var(name).ok())
            .map_err(anyhow::Error::msg)?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognised: `BACKGROUND_CONCURRENCY`, `BACKGROUND_MAX_RETRIES`,
    /// `BACKGROUND_TASK_TIMEOUT_SECS`, `BACKGROUND_SIGNING_KEY`,
    /// `BACKGROUND_LOOPBACK_URL` (switches to loopback launch) and
    /// `BACKGROUND_PROCESS_PROGRAM` (switches to process launch).
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parsed<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{name}: cannot parse `{raw}`"))
        }

        if let Some(raw) = lookup("BACKGROUND_CONCURRENCY") {
            self.pool.concurrency = parsed("BACKGROUND_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("BACKGROUND_MAX_RETRIES") {
            self.dispatch.max_retries = parsed("BACKGROUND_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("BACKGROUND_TASK_TIMEOUT_SECS") {
            self.dispatch.default_timeout_secs = parsed("BACKGROUND_TASK_TIMEOUT_SECS", &raw)?;
        }
        if let Some(key) = lookup("BACKGROUND_SIGNING_KEY") {
            self.signing_key = Some(key);
        }
        if let Some(program) = lookup("BACKGROUND_PROCESS_PROGRAM") {
            self.launch = LaunchConfig::Process {
                program: Some(program),
                args: Vec::new(),
            };
        }
        if let Some(url) = lookup("BACKGROUND_LOOPBACK_URL") {
            self.launch = LaunchConfig::loopback(url);
        }
        Ok(self)
    }
}
