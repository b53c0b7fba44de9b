//! SQLite pool construction and schema setup.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use tracing::debug;

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS peers (
    interface           TEXT    NOT NULL,
    public_key          TEXT    NOT NULL,
    private_key         TEXT    NOT NULL DEFAULT '',
    name                TEXT    NOT NULL DEFAULT '',
    dns                 TEXT    NOT NULL DEFAULT '',
    endpoint_allowed_ip TEXT    NOT NULL DEFAULT '',
    mtu                 INTEGER NOT NULL DEFAULT 1420,
    keepalive           INTEGER NOT NULL DEFAULT 21,
    remote_endpoint     TEXT    NOT NULL DEFAULT '',
    preshared_key       TEXT    NOT NULL DEFAULT '',
    status              TEXT    NOT NULL DEFAULT 'stopped',
    latest_handshake    TEXT    NOT NULL DEFAULT '(None)',
    endpoint            TEXT    NOT NULL DEFAULT 'N/A',
    allowed_ip          TEXT    NOT NULL DEFAULT 'N/A',
    total_receive       REAL    NOT NULL DEFAULT 0,
    total_sent          REAL    NOT NULL DEFAULT 0,
    total_data          REAL    NOT NULL DEFAULT 0,
    cumu_receive        REAL    NOT NULL DEFAULT 0,
    cumu_sent           REAL    NOT NULL DEFAULT 0,
    cumu_data           REAL    NOT NULL DEFAULT 0,
    bandwidth           INTEGER NOT NULL DEFAULT 0,
    ends_at             INTEGER NULL,
    timer_on            INTEGER NOT NULL DEFAULT 0,
    end_active          INTEGER NOT NULL DEFAULT 1,
    created_at          INTEGER NOT NULL,
    PRIMARY KEY (interface, public_key)
);
CREATE INDEX IF NOT EXISTS idx_peers_interface ON peers (interface);
"#;

/// Create a SqlitePool with WAL mode and the peers schema applied.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::InvalidUrl(e.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    // An in-memory database lives and dies with its connection: pin the
    // pool to one connection that is never reaped, or every checkout
    // would see a fresh empty database.
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePool::connect_with(options).await?
    };
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;

    debug!("peer store pool created");
    Ok(pool)
}
