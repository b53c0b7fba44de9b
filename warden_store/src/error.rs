use thiserror::Error;

/// Errors from peer store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),
}
