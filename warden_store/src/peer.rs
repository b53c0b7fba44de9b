//! Peer rows and the operations the engine performs on them.
//!
//! The free functions are generic over the executor so the reconciliation
//! tick can run them inside one transaction per interface; [`PeerStore`]
//! offers pool-backed convenience wrappers for callers outside a tick.

use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

use crate::error::StoreError;

/// Transaction handle covering one interface's tick.
pub type StoreTransaction = Transaction<'static, Sqlite>;

/// One persisted peer row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PeerRecord {
    pub interface: String,
    pub public_key: String,
    pub private_key: String,
    pub name: String,
    pub dns: String,
    pub endpoint_allowed_ip: String,
    pub mtu: i64,
    pub keepalive: i64,
    pub remote_endpoint: String,
    pub preshared_key: String,
    pub status: String,
    pub latest_handshake: String,
    pub endpoint: String,
    pub allowed_ip: String,
    pub total_receive: f64,
    pub total_sent: f64,
    pub total_data: f64,
    pub cumu_receive: f64,
    pub cumu_sent: f64,
    pub cumu_data: f64,
    pub bandwidth: i64,
    pub ends_at: Option<i64>,
    pub timer_on: bool,
    pub end_active: bool,
    pub created_at: i64,
}

impl PeerRecord {
    /// Session transfer plus everything folded across prior resets, in GiB.
    pub fn cumulative_total(&self) -> f64 {
        self.total_sent + self.total_receive + self.cumu_sent + self.cumu_receive
    }
}

/// Seed values for a freshly discovered peer.
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub interface: String,
    pub public_key: String,
    pub dns: String,
    pub endpoint_allowed_ip: String,
    pub mtu: i64,
    pub keepalive: i64,
    pub remote_endpoint: String,
    pub preshared_key: String,
    pub created_at: i64,
}

/// Insert a row for a newly discovered peer with zeroed counters.
pub async fn insert_discovered<'e, E>(executor: E, peer: &NewPeer) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO peers
            (interface, public_key, dns, endpoint_allowed_ip, mtu, keepalive,
             remote_endpoint, preshared_key, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&peer.interface)
    .bind(&peer.public_key)
    .bind(&peer.dns)
    .bind(&peer.endpoint_allowed_ip)
    .bind(peer.mtu)
    .bind(peer.keepalive)
    .bind(&peer.remote_endpoint)
    .bind(&peer.preshared_key)
    .bind(peer.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// All rows for one interface, ordered by public key.
pub async fn list_peers<'e, E>(executor: E, interface: &str) -> Result<Vec<PeerRecord>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, PeerRecord>(
        "SELECT * FROM peers WHERE interface = ? ORDER BY public_key",
    )
    .bind(interface)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// One row by key.
pub async fn get_peer<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
) -> Result<Option<PeerRecord>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, PeerRecord>(
        "SELECT * FROM peers WHERE interface = ? AND public_key = ?",
    )
    .bind(interface)
    .bind(public_key)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// All public keys known for one interface.
pub async fn peer_keys<'e, E>(executor: E, interface: &str) -> Result<Vec<String>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT public_key FROM peers WHERE interface = ? ORDER BY public_key",
    )
    .bind(interface)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Soft-retire one row: the peer vanished from the interface config.
pub async fn retire_peer<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE peers SET end_active = 0 WHERE interface = ? AND public_key = ?")
        .bind(interface)
        .bind(public_key)
        .execute(executor)
        .await?;
    Ok(())
}

/// Write handshake age and derived status for one row.
pub async fn update_handshake<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
    latest_handshake: &str,
    status: &str,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE peers SET latest_handshake = ?, status = ? WHERE interface = ? AND public_key = ?",
    )
    .bind(latest_handshake)
    .bind(status)
    .bind(interface)
    .bind(public_key)
    .execute(executor)
    .await?;
    Ok(())
}

/// Mark every row on an interface stopped (interface is down). Handshake
/// ages are left as they are.
pub async fn set_all_stopped<'e, E>(executor: E, interface: &str) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE peers SET status = 'stopped' WHERE interface = ?")
        .bind(interface)
        .execute(executor)
        .await?;
    Ok(())
}

/// Counter/quota fields written back after the transfer fold.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferUpdate {
    pub total_receive: f64,
    pub total_sent: f64,
    pub cumu_receive: f64,
    pub cumu_sent: f64,
    pub end_active: bool,
    pub status: String,
}

/// Persist the result of one peer's counter fold and quota evaluation.
/// `cumu_data` and `total_data` are recomputed here so they can never
/// drift from their components.
pub async fn update_transfer<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
    update: &TransferUpdate,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"UPDATE peers SET
            total_receive = ?, total_sent = ?, total_data = ?,
            cumu_receive = ?, cumu_sent = ?, cumu_data = ?,
            end_active = ?, status = ?
           WHERE interface = ? AND public_key = ?"#,
    )
    .bind(update.total_receive)
    .bind(update.total_sent)
    .bind(round4(update.total_receive + update.total_sent))
    .bind(update.cumu_receive)
    .bind(update.cumu_sent)
    .bind(round4(update.cumu_receive + update.cumu_sent))
    .bind(update.end_active)
    .bind(&update.status)
    .bind(interface)
    .bind(public_key)
    .execute(executor)
    .await?;
    Ok(())
}

/// Overwrite the recorded endpoint for one row.
pub async fn update_endpoint<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
    endpoint: &str,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE peers SET endpoint = ? WHERE interface = ? AND public_key = ?")
        .bind(endpoint)
        .bind(interface)
        .bind(public_key)
        .execute(executor)
        .await?;
    Ok(())
}

/// Overwrite the allowed-IP assignment for one row (the interface config
/// is authoritative for this field).
pub async fn update_allowed_ip<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
    allowed_ip: &str,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE peers SET allowed_ip = ? WHERE interface = ? AND public_key = ?")
        .bind(allowed_ip)
        .bind(interface)
        .bind(public_key)
        .execute(executor)
        .await?;
    Ok(())
}

/// Operator-editable policy fields.
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub name: String,
    pub private_key: String,
    pub dns: String,
    pub endpoint_allowed_ip: String,
    pub mtu: i64,
    pub keepalive: i64,
    pub preshared_key: String,
    pub bandwidth: i64,
    pub ends_at: Option<i64>,
    pub end_active: bool,
}

/// Persist an operator edit of one peer's policy.
pub async fn update_policy<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
    update: &PolicyUpdate,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"UPDATE peers SET
            name = ?, private_key = ?, dns = ?, endpoint_allowed_ip = ?,
            mtu = ?, keepalive = ?, preshared_key = ?, bandwidth = ?,
            ends_at = ?, end_active = ?
           WHERE interface = ? AND public_key = ?"#,
    )
    .bind(&update.name)
    .bind(&update.private_key)
    .bind(&update.dns)
    .bind(&update.endpoint_allowed_ip)
    .bind(update.mtu)
    .bind(update.keepalive)
    .bind(&update.preshared_key)
    .bind(update.bandwidth)
    .bind(update.ends_at)
    .bind(update.end_active)
    .bind(interface)
    .bind(public_key)
    .execute(executor)
    .await?;
    Ok(())
}

/// Fill in provisioning fields on a freshly added peer's row.
pub async fn update_provisioned<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
    name: &str,
    private_key: &str,
    dns: &str,
    endpoint_allowed_ip: &str,
    bandwidth: i64,
    ends_at: Option<i64>,
    created_at: i64,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"UPDATE peers SET
            name = ?, private_key = ?, dns = ?, endpoint_allowed_ip = ?,
            bandwidth = ?, ends_at = ?, timer_on = 0, created_at = ?
           WHERE interface = ? AND public_key = ?"#,
    )
    .bind(name)
    .bind(private_key)
    .bind(dns)
    .bind(endpoint_allowed_ip)
    .bind(bandwidth)
    .bind(ends_at)
    .bind(created_at)
    .bind(interface)
    .bind(public_key)
    .execute(executor)
    .await?;
    Ok(())
}

/// Hard-delete one row. This is the explicit operator removal path; the
/// reconciliation tick never deletes.
pub async fn delete_peer<'e, E>(
    executor: E,
    interface: &str,
    public_key: &str,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM peers WHERE interface = ? AND public_key = ?")
        .bind(interface)
        .bind(public_key)
        .execute(executor)
        .await?;
    Ok(())
}

/// Every `allowed_ip` assignment on one interface.
pub async fn allowed_ips<'e, E>(executor: E, interface: &str) -> Result<Vec<String>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_scalar::<_, String>("SELECT allowed_ip FROM peers WHERE interface = ?")
        .bind(interface)
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// Count rows on other peers whose allowed IP starts with `<ip>/`.
pub async fn count_allowed_ip_conflicts<'e, E>(
    executor: E,
    interface: &str,
    ip: &str,
    exclude_key: Option<&str>,
) -> Result<i64, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let pattern = format!("{ip}/%");
    let count = match exclude_key {
        Some(key) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM peers WHERE interface = ? AND public_key != ? AND allowed_ip LIKE ?",
            )
            .bind(interface)
            .bind(key)
            .bind(&pattern)
            .fetch_one(executor)
            .await?
        }
        None => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM peers WHERE interface = ? AND allowed_ip LIKE ?",
            )
            .bind(interface)
            .bind(&pattern)
            .fetch_one(executor)
            .await?
        }
    };
    Ok(count)
}

/// Interface-wide traffic totals in GiB: (total, upload, download),
/// session and cumulative combined.
pub async fn interface_totals<'e, E>(
    executor: E,
    interface: &str,
) -> Result<(f64, f64, f64), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (f64, f64) = sqlx::query_as(
        r#"SELECT
            COALESCE(SUM(total_sent + cumu_sent), 0),
            COALESCE(SUM(total_receive + cumu_receive), 0)
           FROM peers WHERE interface = ?"#,
    )
    .bind(interface)
    .fetch_one(executor)
    .await?;

    let (upload, download) = (round4(row.0), round4(row.1));
    Ok((round4(upload + download), upload, download))
}

/// Round to 4 decimal places, the storage precision for GiB counters.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Pool-backed handle to the peer table.
#[derive(Clone)]
pub struct PeerStore {
    pool: SqlitePool,
}

impl PeerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction for one interface's tick.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn list(&self, interface: &str) -> Result<Vec<PeerRecord>, StoreError> {
        list_peers(&self.pool, interface).await
    }

    pub async fn get(
        &self,
        interface: &str,
        public_key: &str,
    ) -> Result<Option<PeerRecord>, StoreError> {
        get_peer(&self.pool, interface, public_key).await
    }

    pub async fn keys(&self, interface: &str) -> Result<Vec<String>, StoreError> {
        peer_keys(&self.pool, interface).await
    }

    pub async fn allowed_ips(&self, interface: &str) -> Result<Vec<String>, StoreError> {
        allowed_ips(&self.pool, interface).await
    }

    pub async fn totals(&self, interface: &str) -> Result<(f64, f64, f64), StoreError> {
        interface_totals(&self.pool, interface).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::create_pool;

    fn sample_peer(interface: &str, key: &str) -> NewPeer {
        NewPeer {
            interface: interface.to_string(),
            public_key: key.to_string(),
            dns: "1.1.1.1".to_string(),
            endpoint_allowed_ip: "0.0.0.0/0".to_string(),
            mtu: 1420,
            keepalive: 21,
            remote_endpoint: "vpn.example.com".to_string(),
            preshared_key: String::new(),
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        insert_discovered(&pool, &sample_peer("wg0", "keyA")).await.unwrap();

        let row = get_peer(&pool, "wg0", "keyA").await.unwrap().unwrap();
        assert_eq!(row.public_key, "keyA");
        assert_eq!(row.status, "stopped");
        assert_eq!(row.latest_handshake, "(None)");
        assert_eq!(row.total_sent, 0.0);
        assert!(row.end_active);
        assert_eq!(row.ends_at, None);

        // Same key on another interface is a distinct row
        insert_discovered(&pool, &sample_peer("wg1", "keyA")).await.unwrap();
        assert_eq!(list_peers(&pool, "wg0").await.unwrap().len(), 1);
        assert_eq!(list_peers(&pool, "wg1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_key_rejected() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        insert_discovered(&pool, &sample_peer("wg0", "keyA")).await.unwrap();
        let err = insert_discovered(&pool, &sample_peer("wg0", "keyA")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn transfer_update_recomputes_sums() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        insert_discovered(&pool, &sample_peer("wg0", "keyA")).await.unwrap();

        let update = TransferUpdate {
            total_receive: 0.25,
            total_sent: 0.5,
            cumu_receive: 1.0,
            cumu_sent: 2.0,
            end_active: true,
            status: "running".to_string(),
        };
        update_transfer(&pool, "wg0", "keyA", &update).await.unwrap();

        let row = get_peer(&pool, "wg0", "keyA").await.unwrap().unwrap();
        assert_eq!(row.total_data, 0.75);
        assert_eq!(row.cumu_data, 3.0);
        assert_eq!(row.status, "running");
        assert_eq!(row.cumulative_total(), 3.75);
    }

    #[tokio::test]
    async fn retire_keeps_row() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        insert_discovered(&pool, &sample_peer("wg0", "keyA")).await.unwrap();
        retire_peer(&pool, "wg0", "keyA").await.unwrap();

        let row = get_peer(&pool, "wg0", "keyA").await.unwrap().unwrap();
        assert!(!row.end_active);
    }

    #[tokio::test]
    async fn allowed_ip_conflict_detection() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        insert_discovered(&pool, &sample_peer("wg0", "keyA")).await.unwrap();
        update_allowed_ip(&pool, "wg0", "keyA", "10.8.0.2/32").await.unwrap();

        let hits = count_allowed_ip_conflicts(&pool, "wg0", "10.8.0.2", None)
            .await
            .unwrap();
        assert_eq!(hits, 1);

        let excluding_self = count_allowed_ip_conflicts(&pool, "wg0", "10.8.0.2", Some("keyA"))
            .await
            .unwrap();
        assert_eq!(excluding_self, 0);

        let other = count_allowed_ip_conflicts(&pool, "wg0", "10.8.0.3", None)
            .await
            .unwrap();
        assert_eq!(other, 0);
    }

    #[tokio::test]
    async fn totals_combine_session_and_cumulative() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        insert_discovered(&pool, &sample_peer("wg0", "keyA")).await.unwrap();
        let update = TransferUpdate {
            total_receive: 0.1,
            total_sent: 0.2,
            cumu_receive: 0.3,
            cumu_sent: 0.4,
            end_active: true,
            status: "running".to_string(),
        };
        update_transfer(&pool, "wg0", "keyA", &update).await.unwrap();

        let (total, upload, download) = interface_totals(&pool, "wg0").await.unwrap();
        assert_eq!(upload, 0.6);
        assert_eq!(download, 0.4);
        assert_eq!(total, 1.0);
    }

    #[tokio::test]
    async fn transaction_rollback_discards_writes() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let store = PeerStore::new(pool);

        let mut tx = store.begin().await.unwrap();
        insert_discovered(&mut *tx, &sample_peer("wg0", "keyA"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.get("wg0", "keyA").await.unwrap().is_none());
    }
}
