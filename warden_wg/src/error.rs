//! Error types for control-plane and config-file access.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from external `wg`/`wg-quick` invocations.
#[derive(Debug, Error)]
pub enum WgError {
    /// The external tool exited non-zero on a mutating operation. The
    /// payload is the tool's own diagnostic text, surfaced verbatim so
    /// callers can display it unmodified.
    #[error("{output}")]
    CommandFailed { command: String, output: String },

    /// The external tool did not finish within the configured timeout
    #[error("command '{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    /// The external tool could not be spawned
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// `wg pubkey` rejected the supplied private key material
    #[error("key derivation failed: {0}")]
    Derivation(String),

    /// I/O error while staging key material for the external tool
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from reading interface configuration files.
#[derive(Debug, Error)]
pub enum ConfError {
    #[error("failed to read interface config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to list interface configs in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown interface '{0}'")]
    UnknownInterface(String),
}
