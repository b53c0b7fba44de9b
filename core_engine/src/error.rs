use shared_utils::validate::ValidationError;
use thiserror::Error;
use warden_store::StoreError;
use warden_wg::error::ConfError;
use warden_wg::WgError;

use crate::keycheck::KeyCheckError;

/// Errors surfaced by the reconciliation engine and the API facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Wg(#[from] WgError),

    #[error(transparent)]
    Conf(#[from] ConfError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    KeyCheck(#[from] KeyCheckError),

    /// Interface name not present in the config directory. Checked before
    /// any store or control-plane access.
    #[error("unknown interface '{0}'")]
    UnknownInterface(String),

    /// Request rejected before any external call was made
    #[error("{0}")]
    Rejected(String),
}
