//! Operator-facing peer operations.
//!
//! Every mutating call validates its input first, then takes the
//! interface lock before touching the control plane, runs a tick body to
//! converge the store, and finally writes the operator-supplied policy
//! fields. Failures before the lock leave no trace; failures after it are
//! converged away by the next scheduled tick.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use tracing::info;
use warden_store::peer as store;
use warden_store::{PeerRecord, PolicyUpdate, StoreError};
use warden_wg::{conf, PeerSpec, ShowOutcome};

use crate::allocator;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::keycheck;
use crate::reconcile::{self, STATUS_RUNNING, STATUS_STOPPED};
use crate::transfer::GIB;
use shared_utils::validate;

/// Sort order for peer listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Status,
    Name,
    AllowedIp,
    TotalData,
}

/// Refresh one interface and return its peers, optionally filtered by a
/// case-insensitive name substring.
pub async fn list_peers(
    ctx: &EngineContext,
    interface: &str,
    search: Option<&str>,
    sort: SortKey,
) -> Result<Vec<PeerRecord>, EngineError> {
    ctx.ensure_known(interface)?;
    reconcile::reconcile_interface(ctx, interface).await?;

    let mut rows = ctx.store.list(interface).await?;

    if let Some(needle) = search {
        let needle = needle.to_lowercase();
        rows.retain(|row| {
            row.name.to_lowercase().contains(&needle)
                || row.public_key.to_lowercase().contains(&needle)
        });
    }

    match sort {
        SortKey::Status => {
            // Running first, then by name
            rows.sort_by(|a, b| {
                let rank = |r: &PeerRecord| if r.status == STATUS_RUNNING { 0 } else { 1 };
                rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
            });
        }
        SortKey::Name => rows.sort_by(|a, b| a.name.cmp(&b.name)),
        SortKey::AllowedIp => {
            rows.sort_by_key(|r| allowed_ip_rank(&r.allowed_ip));
        }
        SortKey::TotalData => {
            rows.sort_by(|a, b| {
                b.cumulative_total()
                    .partial_cmp(&a.cumulative_total())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    Ok(rows)
}

/// Numeric rank of the first CIDR entry in an allowed-IP list, for
/// sorting. Placeholders such as `(None)` rank as `0.0.0.0/0` and sort
/// first.
fn allowed_ip_rank(allowed: &str) -> (u8, u128, u8) {
    let first = allowed.split(',').next().unwrap_or("").trim();
    match first.parse::<IpNet>() {
        Ok(net) => match net.addr() {
            IpAddr::V4(v4) => (0, u128::from(u32::from(v4)), net.prefix_len()),
            IpAddr::V6(v6) => (1, u128::from(v6), net.prefix_len()),
        },
        Err(_) => (0, 0, 0),
    }
}

/// One peer's current row, refreshed first.
pub async fn peer_detail(
    ctx: &EngineContext,
    interface: &str,
    public_key: &str,
) -> Result<PeerRecord, EngineError> {
    ctx.ensure_known(interface)?;
    reconcile::reconcile_interface(ctx, interface).await?;

    ctx.store
        .get(interface, public_key)
        .await?
        .ok_or_else(|| EngineError::Rejected("this peer does not exist".to_string()))
}

/// Free addresses in the interface's subnet(s): configured hosts minus
/// the interface's own addresses and every peer's assignment.
pub async fn available_ips(ctx: &EngineContext, interface: &str) -> Result<Vec<IpAddr>, EngineError> {
    ctx.ensure_known(interface)?;
    let conf = conf::load_interface(&ctx.config.wireguard.conf_path, interface)?;

    let mut in_use = conf.addresses.clone();
    in_use.extend(ctx.store.allowed_ips(interface).await?);

    Ok(allocator::available_ips(&conf.addresses, &in_use))
}

/// Interface-level view: runtime status, listen port, configured
/// addresses, identity and aggregate traffic.
#[derive(Debug, Clone)]
pub struct InterfaceSummary {
    pub name: String,
    pub running: bool,
    pub listen_port: Option<String>,
    pub addresses: Vec<String>,
    /// Derived from the config's private key; `None` when the config
    /// carries no key or derivation fails.
    pub public_key: Option<String>,
    pub peer_count: usize,
    pub running_peers: usize,
    /// GiB, session and cumulative combined.
    pub total_data: f64,
    pub upload: f64,
    pub download: f64,
}

/// Summarize one interface from its config, the live control plane and
/// the store.
pub async fn interface_summary(
    ctx: &EngineContext,
    interface: &str,
) -> Result<InterfaceSummary, EngineError> {
    ctx.ensure_known(interface)?;
    let conf = conf::load_interface(&ctx.config.wireguard.conf_path, interface)?;

    let running = matches!(ctx.wg.peer_keys(interface).await?, ShowOutcome::Up(_));

    // The config value wins; a running interface can answer when the
    // config is silent.
    let listen_port = match conf.listen_port.clone() {
        Some(port) => Some(port),
        None => match ctx.wg.listen_port(interface).await? {
            ShowOutcome::Up(port) if !port.is_empty() => Some(port),
            _ => None,
        },
    };

    let public_key = match &conf.private_key {
        Some(private_key) => ctx.wg.derive_public_key(private_key).await.ok(),
        None => None,
    };

    let rows = ctx.store.list(interface).await?;
    let running_peers = rows.iter().filter(|r| r.status == STATUS_RUNNING).count();
    let (total_data, upload, download) = ctx.store.totals(interface).await?;

    Ok(InterfaceSummary {
        name: conf.name,
        running,
        listen_port,
        addresses: conf.addresses,
        public_key,
        peer_count: rows.len(),
        running_peers,
        total_data,
        upload,
        download,
    })
}

/// Bring an interface up or down with `wg-quick`, then run a tick so the
/// store reflects the new state immediately.
pub async fn set_interface_state(
    ctx: &EngineContext,
    interface: &str,
    up: bool,
) -> Result<(), EngineError> {
    ctx.ensure_known(interface)?;

    let lock = ctx.interface_lock(interface).await;
    let _guard = lock.lock().await;

    ctx.wg.set_interface_state(interface, up).await?;
    info!(interface, up, "interface state changed");
    reconcile::reconcile_locked(ctx, interface, reconcile::unix_now()).await?;
    Ok(())
}

/// Verify that a private key belongs to an existing peer's public key.
pub async fn check_key(
    ctx: &EngineContext,
    interface: &str,
    private_key: &str,
    public_key: &str,
) -> Result<(), EngineError> {
    ctx.ensure_known(interface)?;
    keycheck::check_key_match(ctx.wg.as_ref(), &ctx.store, interface, private_key, public_key)
        .await?;
    Ok(())
}

/// A request to attach one new peer.
#[derive(Debug, Clone, Default)]
pub struct AddPeerRequest {
    pub public_key: String,
    /// Stored for client config generation; may be empty when the
    /// operator keeps the private key themselves.
    pub private_key: String,
    pub name: String,
    pub allowed_ips: String,
    pub dns: String,
    pub endpoint_allowed_ip: String,
    pub preshared_key: String,
    /// Session bandwidth cap in GiB; 0 means unlimited.
    pub bandwidth_gib: f64,
    /// Unix seconds after which the peer is revoked; `None` means never.
    pub ends_at: Option<i64>,
}

/// Attach one peer to an interface and record its policy.
pub async fn add_peer(
    ctx: &EngineContext,
    interface: &str,
    request: &AddPeerRequest,
) -> Result<(), EngineError> {
    ctx.ensure_known(interface)?;
    validate_policy_fields(
        &request.dns,
        &request.endpoint_allowed_ip,
        &request.preshared_key,
        request.bandwidth_gib,
    )?;
    validate::check_wg_key(&request.public_key)?;
    validate::check_allowed_ips(&request.allowed_ips)?;
    if !request.private_key.is_empty() {
        validate::check_wg_key(&request.private_key)?;
    }

    let lock = ctx.interface_lock(interface).await;
    let _guard = lock.lock().await;

    let live_keys = match ctx.wg.peer_keys(interface).await? {
        ShowOutcome::Up(keys) => keys,
        ShowOutcome::Down => {
            return Err(EngineError::Rejected(format!(
                "{interface} is not running, bring it up before adding peers"
            )));
        }
    };
    if live_keys.iter().any(|k| k == &request.public_key) {
        return Err(EngineError::Rejected(
            "public key already exists on this interface".to_string(),
        ));
    }
    ensure_assignments_free(ctx, interface, &request.allowed_ips, None).await?;

    let allowed = normalize_cidr_list(&request.allowed_ips);
    let spec = PeerSpec {
        public_key: request.public_key.clone(),
        allowed_ips: allowed,
        preshared_key: (!request.preshared_key.is_empty())
            .then(|| request.preshared_key.clone()),
    };
    ctx.wg.add_peers(interface, &[spec]).await?;
    ctx.wg.save(interface).await?;

    let now = reconcile::unix_now();
    reconcile::reconcile_locked(ctx, interface, now).await?;

    store::update_provisioned(
        ctx.store.pool(),
        interface,
        &request.public_key,
        &request.name,
        &request.private_key,
        &request.dns,
        &request.endpoint_allowed_ip,
        bandwidth_bytes(request.bandwidth_gib),
        request.ends_at,
        now,
    )
    .await?;

    info!(interface, public_key = %request.public_key, "peer added");
    Ok(())
}

/// Key material for one peer in a bulk attach. Keys are generated by the
/// caller; the engine only validates and assigns addresses.
#[derive(Debug, Clone)]
pub struct BulkPeer {
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: Option<String>,
    pub name: String,
}

/// Attach several peers at once, each assigned the next free address from
/// the interface's pool. Returns the assignments in request order.
pub async fn add_peers_bulk(
    ctx: &EngineContext,
    interface: &str,
    peers: &[BulkPeer],
    bandwidth_gib: f64,
    ends_at: Option<i64>,
) -> Result<Vec<String>, EngineError> {
    ctx.ensure_known(interface)?;
    if peers.is_empty() {
        return Ok(Vec::new());
    }
    if bandwidth_gib < 0.0 {
        return Err(EngineError::Rejected("bandwidth must not be negative".to_string()));
    }
    let mut seen = HashSet::new();
    for peer in peers {
        validate::check_wg_key(&peer.public_key)?;
        validate::check_wg_key(&peer.private_key)?;
        if let Some(psk) = &peer.preshared_key {
            validate::check_wg_key(psk)?;
        }
        if !seen.insert(peer.public_key.as_str()) {
            return Err(EngineError::Rejected(
                "duplicate public key in bulk request".to_string(),
            ));
        }
    }

    let lock = ctx.interface_lock(interface).await;
    let _guard = lock.lock().await;

    let live_keys = match ctx.wg.peer_keys(interface).await? {
        ShowOutcome::Up(keys) => keys,
        ShowOutcome::Down => {
            return Err(EngineError::Rejected(format!(
                "{interface} is not running, bring it up before adding peers"
            )));
        }
    };
    if peers
        .iter()
        .any(|p| live_keys.iter().any(|k| k == &p.public_key))
    {
        return Err(EngineError::Rejected(
            "public key already exists on this interface".to_string(),
        ));
    }

    let conf = conf::load_interface(&ctx.config.wireguard.conf_path, interface)?;
    let mut in_use = conf.addresses.clone();
    in_use.extend(ctx.store.allowed_ips(interface).await?);
    let pool = allocator::available_ips(&conf.addresses, &in_use);
    if pool.len() < peers.len() {
        return Err(EngineError::Rejected(format!(
            "not enough free addresses: {} requested, {} available",
            peers.len(),
            pool.len()
        )));
    }

    let assignments: Vec<String> = pool
        .iter()
        .take(peers.len())
        .map(|addr| match addr {
            IpAddr::V4(_) => format!("{addr}/32"),
            IpAddr::V6(_) => format!("{addr}/128"),
        })
        .collect();

    let specs: Vec<PeerSpec> = peers
        .iter()
        .zip(&assignments)
        .map(|(peer, allowed)| PeerSpec {
            public_key: peer.public_key.clone(),
            allowed_ips: allowed.clone(),
            preshared_key: peer.preshared_key.clone(),
        })
        .collect();
    ctx.wg.add_peers(interface, &specs).await?;
    ctx.wg.save(interface).await?;

    let now = reconcile::unix_now();
    reconcile::reconcile_locked(ctx, interface, now).await?;

    let defaults = &ctx.config.peer_defaults;
    for peer in peers {
        store::update_provisioned(
            ctx.store.pool(),
            interface,
            &peer.public_key,
            &peer.name,
            &peer.private_key,
            &defaults.dns,
            &defaults.endpoint_allowed_ip,
            bandwidth_bytes(bandwidth_gib),
            ends_at,
            now,
        )
        .await?;
    }

    info!(interface, count = peers.len(), "peers added in bulk");
    Ok(assignments)
}

/// Detach peers from the interface and delete their rows. Rows are only
/// deleted through this explicit path, never by the tick.
pub async fn remove_peers(
    ctx: &EngineContext,
    interface: &str,
    public_keys: &[String],
) -> Result<(), EngineError> {
    ctx.ensure_known(interface)?;

    let lock = ctx.interface_lock(interface).await;
    let _guard = lock.lock().await;

    for key in public_keys {
        if ctx.store.get(interface, key).await?.is_none() {
            return Err(EngineError::Rejected(format!(
                "peer {key} does not exist"
            )));
        }
    }

    for key in public_keys {
        ctx.wg.remove_peer(interface, key).await?;
    }
    ctx.wg.save(interface).await?;

    let mut tx = ctx.store.begin().await?;
    for key in public_keys {
        store::delete_peer(&mut *tx, interface, key).await?;
    }
    tx.commit().await.map_err(StoreError::from)?;

    info!(interface, count = public_keys.len(), "peers removed");
    Ok(())
}

/// An operator edit of one peer's policy fields.
#[derive(Debug, Clone, Default)]
pub struct UpdatePeerRequest {
    pub public_key: String,
    pub name: String,
    pub private_key: String,
    pub dns: String,
    pub allowed_ip: String,
    pub endpoint_allowed_ip: String,
    pub mtu: String,
    pub keepalive: String,
    pub preshared_key: String,
    pub bandwidth_gib: f64,
    pub ends_at: Option<i64>,
}

/// Apply a policy edit. Eligibility is re-evaluated against the new cap:
/// a peer pushed over quota by the edit is revoked, a retired-but-eligible
/// peer gets its assignment reapplied.
pub async fn update_peer(
    ctx: &EngineContext,
    interface: &str,
    request: &UpdatePeerRequest,
) -> Result<(), EngineError> {
    ctx.ensure_known(interface)?;

    // Held across the row read so a concurrent tick cannot rewrite the
    // totals the eligibility decision is based on
    let lock = ctx.interface_lock(interface).await;
    let _guard = lock.lock().await;

    let row = ctx
        .store
        .get(interface, &request.public_key)
        .await?
        .ok_or_else(|| EngineError::Rejected("this peer does not exist".to_string()))?;

    validate_policy_fields(
        &request.dns,
        &request.endpoint_allowed_ip,
        &request.preshared_key,
        request.bandwidth_gib,
    )?;
    validate::check_allowed_ips(&request.allowed_ip)?;
    let mtu = validate::check_mtu(&request.mtu)?;
    let keepalive = validate::check_keepalive(&request.keepalive)?;
    ensure_assignments_free(ctx, interface, &request.allowed_ip, Some(&request.public_key))
        .await?;
    if !request.private_key.is_empty() {
        keycheck::check_key_match(
            ctx.wg.as_ref(),
            &ctx.store,
            interface,
            &request.private_key,
            &request.public_key,
        )
        .await?;
    }

    let now = reconcile::unix_now();
    let end_active = crate::transfer::evaluate_quota(
        request.ends_at,
        bandwidth_bytes(request.bandwidth_gib),
        row.total_sent,
        now,
    );

    if end_active {
        if !request.preshared_key.is_empty() {
            ctx.wg
                .set_preshared_key(interface, &request.public_key, &request.preshared_key)
                .await?;
        }
        ctx.wg
            .set_allowed_ips(
                interface,
                &request.public_key,
                &normalize_cidr_list(&request.allowed_ip),
            )
            .await?;
    } else {
        ctx.wg.remove_peer(interface, &request.public_key).await?;
        store::update_handshake(
            ctx.store.pool(),
            interface,
            &request.public_key,
            &row.latest_handshake,
            STATUS_STOPPED,
        )
        .await?;
        info!(interface, public_key = %request.public_key, "policy edit revoked peer");
    }
    ctx.wg.save(interface).await?;

    let policy = PolicyUpdate {
        name: request.name.clone(),
        private_key: request.private_key.clone(),
        dns: request.dns.clone(),
        endpoint_allowed_ip: request.endpoint_allowed_ip.clone(),
        mtu: i64::from(mtu),
        keepalive: i64::from(keepalive),
        preshared_key: request.preshared_key.clone(),
        bandwidth: bandwidth_bytes(request.bandwidth_gib),
        ends_at: request.ends_at,
        end_active,
    };
    store::update_policy(ctx.store.pool(), interface, &request.public_key, &policy).await?;
    Ok(())
}

/// Shared validation for the policy fields carried by add and update.
fn validate_policy_fields(
    dns: &str,
    endpoint_allowed_ip: &str,
    preshared_key: &str,
    bandwidth_gib: f64,
) -> Result<(), EngineError> {
    validate::check_dns(dns)?;
    validate::check_allowed_ips(endpoint_allowed_ip)?;
    if !preshared_key.is_empty() {
        validate::check_wg_key(preshared_key)?;
    }
    if bandwidth_gib < 0.0 {
        return Err(EngineError::Rejected("bandwidth must not be negative".to_string()));
    }
    Ok(())
}

/// Reject the request if any host in `allowed_ips` is already assigned to
/// a different peer on this interface.
async fn ensure_assignments_free(
    ctx: &EngineContext,
    interface: &str,
    allowed_ips: &str,
    exclude_key: Option<&str>,
) -> Result<(), EngineError> {
    for entry in allowed_ips.split(',') {
        let host = entry.split('/').next().unwrap_or("").trim();
        if host.is_empty() {
            continue;
        }
        let conflicts =
            store::count_allowed_ip_conflicts(ctx.store.pool(), interface, host, exclude_key)
                .await?;
        if conflicts > 0 {
            return Err(EngineError::Rejected(format!(
                "allowed IP {host} is already in use by another peer"
            )));
        }
    }
    Ok(())
}

fn normalize_cidr_list(value: &str) -> String {
    value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn bandwidth_bytes(gib: f64) -> i64 {
    (gib * GIB).round() as i64
}
