//! Builders wiring configuration, store and jobs into running components.

pub mod background_builder;

pub use background_builder::{Background, BackgroundBuilder, BackgroundServers};
