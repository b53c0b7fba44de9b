//! WireGuard control-plane access for wgwarden.
//!
//! This crate wraps the external `wg`/`wg-quick` command surface behind the
//! [`client::WgClient`] trait and parses on-disk interface configuration
//! files. It never builds shell command lines: every invocation is an
//! argument vector with a bounded timeout.

pub mod client;
pub mod conf;
pub mod error;

pub use client::{PeerSpec, ShowOutcome, SystemWgClient, TransferCounters, WgClient};
pub use conf::{InterfaceConf, PeerConf};
pub use error::WgError;
