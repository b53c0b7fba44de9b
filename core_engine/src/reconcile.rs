//! Per-interface reconciliation tick.
//!
//! One tick reads the interface config and the live control-plane state,
//! and converges the store: discover new peers, retire vanished ones,
//! refresh status and handshake ages, fold transfer counters, evaluate
//! quotas (revoking over-quota peers), and mirror endpoints and
//! allowed-IP assignments. All store writes for one tick happen inside a
//! single transaction; a failure mid-tick leaves the previous state
//! intact and the next tick starts over.

use std::collections::HashSet;

use tracing::{debug, info, warn};
use warden_store::peer as store;
use warden_store::{NewPeer, StoreError, StoreTransaction, TransferUpdate};
use warden_wg::{conf, ShowOutcome};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::transfer::{bytes_to_gib, evaluate_quota, fold_counters, SessionCounters};

/// A peer with a handshake older than this is considered stopped.
pub const HANDSHAKE_WINDOW_SECS: i64 = 120;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_STOPPED: &str = "stopped";

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Status and rendered handshake age for one peer. A zero timestamp means
/// no handshake has ever completed; the age then stays `(None)`.
pub fn peer_status(handshake_ts: i64, now: i64) -> (&'static str, String) {
    if handshake_ts <= 0 {
        return (STATUS_STOPPED, "(None)".to_string());
    }
    let age = now - handshake_ts;
    if age < HANDSHAKE_WINDOW_SECS {
        (STATUS_RUNNING, age.to_string())
    } else {
        (STATUS_STOPPED, age.to_string())
    }
}

/// Run one reconciliation tick for `interface`, serialized against
/// mutating API calls on the same interface.
pub async fn reconcile_interface(ctx: &EngineContext, interface: &str) -> Result<(), EngineError> {
    let lock = ctx.interface_lock(interface).await;
    let _guard = lock.lock().await;
    reconcile_locked(ctx, interface, unix_now()).await
}

/// The tick body. The caller must hold the interface lock.
pub(crate) async fn reconcile_locked(
    ctx: &EngineContext,
    interface: &str,
    now: i64,
) -> Result<(), EngineError> {
    let conf = conf::load_interface(&ctx.config.wireguard.conf_path, interface)?;
    let mut tx = ctx.store.begin().await?;

    let config_keys = sync_membership(ctx, &mut tx, interface, &conf, now).await?;

    match ctx.wg.latest_handshakes(interface).await? {
        ShowOutcome::Down => {
            debug!(interface, "interface down, marking all peers stopped");
            store::set_all_stopped(&mut *tx, interface).await?;
        }
        ShowOutcome::Up(handshakes) => {
            for (key, ts) in &handshakes {
                let (status, age) = peer_status(*ts, now);
                store::update_handshake(&mut *tx, interface, key, &age, status).await?;
            }

            if let ShowOutcome::Up(transfers) = ctx.wg.transfer(interface).await? {
                sync_transfers(ctx, &mut tx, interface, &config_keys, &transfers, now).await?;
            }

            if let ShowOutcome::Up(endpoints) = ctx.wg.endpoints(interface).await? {
                for (key, endpoint) in &endpoints {
                    store::update_endpoint(&mut *tx, interface, key, endpoint).await?;
                }
            }
        }
    }

    // The config file is authoritative for allowed-IP assignments
    for peer in &conf.peers {
        if let Some(key) = &peer.public_key {
            let allowed = peer.allowed_ips.as_deref().unwrap_or("(None)");
            store::update_allowed_ip(&mut *tx, interface, key, allowed).await?;
        }
    }

    tx.commit().await.map_err(StoreError::from)?;
    Ok(())
}

/// Discovery and retirement: insert rows for config peers the store does
/// not know, soft-retire rows whose peer left the config. Returns the set
/// of public keys present in the config.
async fn sync_membership(
    ctx: &EngineContext,
    tx: &mut StoreTransaction,
    interface: &str,
    conf: &conf::InterfaceConf,
    now: i64,
) -> Result<HashSet<String>, EngineError> {
    let existing: HashSet<String> = store::peer_keys(&mut **tx, interface)
        .await?
        .into_iter()
        .collect();

    let mut config_keys = HashSet::new();
    for peer in &conf.peers {
        let Some(key) = &peer.public_key else {
            warn!(interface, "peer section without a public key, skipping");
            continue;
        };
        config_keys.insert(key.clone());

        if !existing.contains(key) {
            let defaults = &ctx.config.peer_defaults;
            let row = NewPeer {
                interface: interface.to_string(),
                public_key: key.clone(),
                dns: defaults.dns.clone(),
                endpoint_allowed_ip: defaults.endpoint_allowed_ip.clone(),
                mtu: i64::from(defaults.mtu),
                keepalive: i64::from(defaults.keepalive),
                remote_endpoint: defaults.remote_endpoint.clone(),
                preshared_key: peer.preshared_key.clone().unwrap_or_default(),
                created_at: now,
            };
            store::insert_discovered(&mut **tx, &row).await?;
            info!(interface, public_key = %key, "discovered new peer");
        }
    }

    for key in existing.difference(&config_keys) {
        store::retire_peer(&mut **tx, interface, key).await?;
        debug!(interface, public_key = %key, "peer left the config, retired");
    }

    Ok(config_keys)
}

/// Fold live counters into every running peer's row and evaluate its
/// quota, revoking peers that are no longer eligible.
async fn sync_transfers(
    ctx: &EngineContext,
    tx: &mut StoreTransaction,
    interface: &str,
    config_keys: &HashSet<String>,
    transfers: &std::collections::HashMap<String, warden_wg::TransferCounters>,
    now: i64,
) -> Result<(), EngineError> {
    let rows = store::list_peers(&mut **tx, interface).await?;

    for row in rows {
        if row.status != STATUS_RUNNING {
            continue;
        }

        // A running peer missing from the transfer output folds as a
        // counter reset: live values are taken as zero.
        let live = transfers.get(&row.public_key).copied().unwrap_or_default();
        let stored = SessionCounters {
            total_receive: row.total_receive,
            total_sent: row.total_sent,
            cumu_receive: row.cumu_receive,
            cumu_sent: row.cumu_sent,
        };
        let folded = fold_counters(&stored, bytes_to_gib(live.received), bytes_to_gib(live.sent));

        let mut status = row.status.clone();
        let end_active = if config_keys.contains(&row.public_key) {
            let eligible = evaluate_quota(row.ends_at, row.bandwidth, folded.total_sent, now);
            if !eligible {
                match ctx.wg.remove_peer(interface, &row.public_key).await {
                    Ok(()) => {
                        info!(interface, public_key = %row.public_key, "quota exhausted, peer revoked");
                        status = STATUS_STOPPED.to_string();
                    }
                    Err(error) => {
                        // Status stays running, so the next tick retries
                        warn!(interface, public_key = %row.public_key, %error, "revocation failed");
                    }
                }
            }
            eligible
        } else {
            // Retired from the config: counters keep accruing, but the
            // peer never regains eligibility here and is never revoked
            // (there is nothing attached to revoke).
            false
        };

        let update = TransferUpdate {
            total_receive: folded.total_receive,
            total_sent: folded.total_sent,
            cumu_receive: folded.cumu_receive,
            cumu_sent: folded.cumu_sent,
            end_active,
            status,
        };
        store::update_transfer(&mut **tx, interface, &row.public_key, &update).await?;
    }

    Ok(())
}
