//! Infrastructure adapters for the shared key-value store.

pub mod store;

pub use store::{FileStore, InMemoryStore};
