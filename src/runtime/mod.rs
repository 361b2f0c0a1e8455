//! Runtime adapters: spawner, launch strategies and the loopback endpoint.

pub mod api;
pub mod launcher;
pub mod tokio_spawner;

pub use api::{LoopbackHandler, LoopbackResponse, LOOPBACK_PATH, TOKEN_HEADER};
#[cfg(feature = "loopback")]
pub use launcher::LoopbackLauncher;
pub use launcher::{InProcessLauncher, ProcessLauncher, TOKEN_ENV};
pub use tokio_spawner::TokioSpawner;
