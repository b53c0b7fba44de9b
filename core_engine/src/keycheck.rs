//! One-shot private/public key match validation.

use thiserror::Error;
use warden_store::{PeerStore, StoreError};
use warden_wg::{WgClient, WgError};

/// Why a key check was rejected. A malformed private key is reported
/// distinctly from a key that derives to something else.
#[derive(Debug, Error)]
pub enum KeyCheckError {
    #[error("private key is malformed: {0}")]
    Derivation(String),

    #[error("private key does not match the public key")]
    Mismatch,

    #[error("no peer with this public key exists")]
    UnknownPeer,

    #[error(transparent)]
    Wg(WgError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verify that `private_key` derives `public_key` and that exactly one
/// peer row with that key exists on the interface.
pub async fn check_key_match(
    wg: &dyn WgClient,
    store: &PeerStore,
    interface: &str,
    private_key: &str,
    public_key: &str,
) -> Result<(), KeyCheckError> {
    let derived = match wg.derive_public_key(private_key).await {
        Ok(key) => key,
        Err(WgError::Derivation(reason)) => return Err(KeyCheckError::Derivation(reason)),
        Err(other) => return Err(KeyCheckError::Wg(other)),
    };

    if derived != public_key {
        return Err(KeyCheckError::Mismatch);
    }

    // (interface, public_key) is the primary key, so at most one row exists
    match store.get(interface, &derived).await? {
        Some(_) => Ok(()),
        None => Err(KeyCheckError::UnknownPeer),
    }
}
