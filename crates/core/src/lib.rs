//! Core types and utilities for the live price feed
//!
//! This crate provides shared types used across all components:
//! - Symbols, quotes and price updates
//! - Connection status and feed snapshots
//! - Feed, source and socket configuration

pub mod types;
pub mod config;
pub mod errors;

pub use types::*;
pub use config::*;
pub use errors::*;
