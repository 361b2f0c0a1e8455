//! Configuration models for dispatch, pools, leases and scheduling.

pub mod background;
pub mod pool;

pub use background::{BackgroundConfig, DispatchConfig, LaunchConfig, SchedulerConfig};
pub use pool::{LeaseConfig, PoolConfig};
