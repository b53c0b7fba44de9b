//! Shared engine state, passed explicitly to every component.
//!
//! There are no process-wide singletons: everything a tick or an API call
//! needs (config, store handle, control-plane client, per-interface locks)
//! travels through an [`EngineContext`].

use std::collections::HashMap;
use std::sync::Arc;

use shared_utils::WardenConfig;
use tokio::sync::Mutex;
use warden_store::PeerStore;
use warden_wg::{conf, WgClient};

use crate::error::EngineError;

pub struct EngineContext {
    pub config: Arc<WardenConfig>,
    pub store: PeerStore,
    pub wg: Arc<dyn WgClient>,
    /// One lock per interface. A reconciliation tick and a mutating API
    /// call for the same interface are mutually exclusive; different
    /// interfaces proceed concurrently.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EngineContext {
    pub fn new(config: Arc<WardenConfig>, store: PeerStore, wg: Arc<dyn WgClient>) -> Self {
        Self {
            config,
            store,
            wg,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The lock guarding one interface's store and control-plane state.
    pub async fn interface_lock(&self, interface: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(interface.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Interfaces currently defined in the config directory.
    pub fn known_interfaces(&self) -> Result<Vec<String>, EngineError> {
        Ok(conf::list_interfaces(&self.config.wireguard.conf_path)?)
    }

    /// Reject interface identifiers that do not correspond to a config
    /// file. Called before any store access on behalf of external input.
    pub fn ensure_known(&self, interface: &str) -> Result<(), EngineError> {
        if self.known_interfaces()?.iter().any(|i| i == interface) {
            Ok(())
        } else {
            Err(EngineError::UnknownInterface(interface.to_string()))
        }
    }
}
