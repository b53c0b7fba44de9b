//! Shared utilities for wgwarden components.
//!
//! This crate provides common functionality used by the wgwarden daemon
//! and its support crates: configuration loading, structured logging and
//! request field validation.

pub mod config;
pub mod logging;
pub mod validate;

// Re-export commonly used items for convenience
pub use config::{ConfigError, PeerDefaults, WardenConfig};
