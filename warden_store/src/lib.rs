//! Persistent peer store for wgwarden.
//!
//! One normalized SQLite table holds every peer row, keyed by
//! `(interface, public_key)`. Interface identifiers are validated against
//! the known config set by the caller before any store access; they are
//! never spliced into SQL as schema identifiers.

pub mod error;
pub mod peer;
pub mod pool;

pub use error::StoreError;
pub use peer::{NewPeer, PeerRecord, PeerStore, PolicyUpdate, StoreTransaction, TransferUpdate};
pub use pool::create_pool;
