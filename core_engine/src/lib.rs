//! Peer state reconciliation and quota engine for wgwarden.
//!
//! On every tick the engine merges three independently updated sources of
//! truth per interface: the on-disk config file, the live control-plane
//! output, and the persisted peer store. It discovers new peers, retires
//! vanished ones, folds traffic counters across interface restarts, and
//! revokes peers whose time or bandwidth quota ran out.

pub mod allocator;
pub mod api;
pub mod context;
pub mod error;
pub mod keycheck;
pub mod reconcile;
pub mod scheduler;
pub mod transfer;

pub use context::EngineContext;
pub use error::EngineError;
