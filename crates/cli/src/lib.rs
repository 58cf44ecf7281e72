//! Command line host for the live price feed
//!
//! Loads layered configuration and runs a polling or streaming feed
//! until shutdown.

pub mod runner;
pub mod settings;

pub use runner::RunningFeed;
