//! Unit tests for individual components

mod config_test;
mod cron_test;
mod envelope_test;
mod error_test;
mod store_test;
