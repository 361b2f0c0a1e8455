//! # Prometheus Background
//!
//! Background task offload for request-driven hosts: fire-and-forget task
//! dispatch, chunked fan-out/fan-in worker pools and persisted cron
//! schedules, all coordinated through one shared key-value store.
//!
//! ## Core Problem Solved
//!
//! A request handler often has to start work that outlives the request.
//! This crate stores the work as an explicit job descriptor (a registered
//! job name plus JSON arguments), hands its key to a launch strategy, and
//! lets whichever side picks the key up claim and run it:
//!
//! - **Task dispatch**: store, launch, retry with a fresh key on failure,
//!   and optionally wait until the key disappears
//! - **Worker pool**: split a stage into contiguous chunks, run chunks
//!   concurrently and items within a chunk in order, then run a finish job
//! - **Cron scheduler**: a versioned schedule list advanced by conditional
//!   writes, firing due entries through the dispatcher
//! - **Runner election**: a TTL lease so one process per role drains the
//!   queued stages and the schedule
//!
//! ## Launch Strategies
//!
//! - `in_process`: a detached tokio task (default)
//! - `process`: a sibling OS process that receives the task key
//! - `loopback`: a short request to this deployment's own endpoint, which
//!   answers before the task runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_background::builders::BackgroundBuilder;
//! use prometheus_background::config::BackgroundConfig;
//! use prometheus_background::core::{JobDescriptor, JobRegistry};
//!
//! let mut registry = JobRegistry::new();
//! registry.register_fn("send_mail", |ctx| async move {
//!     let to: String = ctx.args()?;
//!     tracing::info!(%to, "sending");
//!     Ok(())
//! })?;
//!
//! let background = BackgroundBuilder::new(BackgroundConfig::from_env()?)
//!     .with_registry(registry)
//!     .build()?;
//!
//! let handle = background
//!     .dispatcher()
//!     .dispatch(JobDescriptor::new("send_mail", "ops@example.com")?)
//!     .await?;
//! background.dispatcher().wait(&handle).await?;
//!
//! background
//!     .scheduler()
//!     .add("*/5 * * * *", JobDescriptor::named("cleanup"), "cleanup", -1)
//!     .await?;
//! let servers = background.start_servers().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Dispatch, pool, lease and scheduling abstractions.
pub mod core;
/// Configuration models for dispatch, pools, leases and scheduling.
pub mod config;
/// Builders wiring configuration into running components.
pub mod builders;
/// Store backends.
pub mod infra;
/// Spawners, launch strategies and the loopback endpoint.
pub mod runtime;
/// Shared utilities.
pub mod util;
