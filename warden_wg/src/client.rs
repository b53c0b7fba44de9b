//! Control-plane client for live WireGuard interfaces.
//!
//! Queries (`wg show ...`) return [`ShowOutcome::Down`] when the external
//! command fails: a stopped interface is an expected, frequent state and
//! must not surface as an error. Mutating operations (`wg set ...`,
//! `wg-quick save`) do surface failures, with the tool's diagnostic text
//! kept verbatim.

use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::WgError;

/// Result of a `wg show` query: a parsed value, or an explicit signal that
/// the interface is not running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowOutcome<T> {
    Up(T),
    Down,
}

/// Live transfer counters for one peer, in bytes since the interface last
/// reset its own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferCounters {
    pub received: u64,
    pub sent: u64,
}

/// A peer entry for a batched `wg set` invocation.
#[derive(Debug, Clone)]
pub struct PeerSpec {
    pub public_key: String,
    pub allowed_ips: String,
    pub preshared_key: Option<String>,
}

/// Command surface used by the reconciliation engine and the API facade.
#[async_trait]
pub trait WgClient: Send + Sync {
    /// `wg show <interface> peers`
    async fn peer_keys(&self, interface: &str) -> Result<ShowOutcome<Vec<String>>, WgError>;

    /// `wg show <interface> latest-handshakes`: peer key to unix seconds
    /// of the last handshake (0 when none has happened yet).
    async fn latest_handshakes(
        &self,
        interface: &str,
    ) -> Result<ShowOutcome<HashMap<String, i64>>, WgError>;

    /// `wg show <interface> transfer`
    async fn transfer(
        &self,
        interface: &str,
    ) -> Result<ShowOutcome<HashMap<String, TransferCounters>>, WgError>;

    /// `wg show <interface> endpoints`
    async fn endpoints(
        &self,
        interface: &str,
    ) -> Result<ShowOutcome<HashMap<String, String>>, WgError>;

    /// `wg show <interface> listen-port`
    async fn listen_port(&self, interface: &str) -> Result<ShowOutcome<String>, WgError>;

    /// `wg set <interface> peer <key> allowed-ips <cidr>`
    async fn set_allowed_ips(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ips: &str,
    ) -> Result<(), WgError>;

    /// `wg set <interface> peer <key> preshared-key <file>`. The key
    /// material is staged in a temporary file for the duration of the call.
    async fn set_preshared_key(
        &self,
        interface: &str,
        public_key: &str,
        preshared_key: &str,
    ) -> Result<(), WgError>;

    /// `wg set <interface> peer <key> remove`
    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), WgError>;

    /// One `wg set` invocation attaching several peers at once
    async fn add_peers(&self, interface: &str, peers: &[PeerSpec]) -> Result<(), WgError>;

    /// `wg-quick save <interface>`: persists live state into the config
    /// file; required after any mutation to survive interface restarts.
    async fn save(&self, interface: &str) -> Result<(), WgError>;

    /// `wg-quick up <interface>` or `wg-quick down <interface>`
    async fn set_interface_state(&self, interface: &str, up: bool) -> Result<(), WgError>;

    /// `wg pubkey`: derive the public key for the given private key. The
    /// key is written to the child's stdin, never to the command line.
    async fn derive_public_key(&self, private_key: &str) -> Result<String, WgError>;
}

/// [`WgClient`] backed by the system `wg` and `wg-quick` binaries.
pub struct SystemWgClient {
    timeout: Duration,
}

impl SystemWgClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a command and return its stdout, treating any failure to run or
    /// non-zero exit as an error carrying the tool's verbatim output.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<String, WgError> {
        let command = format!("{} {}", program, args.join(" "));
        debug!(%command, "running control-plane command");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| WgError::Timeout {
            command: command.clone(),
            timeout_secs: self.timeout.as_secs(),
        })?
        .map_err(|source| WgError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(WgError::CommandFailed {
                command,
                output: text,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a `wg show` query, mapping a non-zero exit to `Down`.
    async fn run_show(&self, interface: &str, field: &str) -> Result<ShowOutcome<String>, WgError> {
        match self.run_checked("wg", &["show", interface, field]).await {
            Ok(stdout) => Ok(ShowOutcome::Up(stdout)),
            Err(WgError::CommandFailed { .. }) => {
                debug!(interface, field, "interface is down");
                Ok(ShowOutcome::Down)
            }
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl WgClient for SystemWgClient {
    async fn peer_keys(&self, interface: &str) -> Result<ShowOutcome<Vec<String>>, WgError> {
        Ok(match self.run_show(interface, "peers").await? {
            ShowOutcome::Up(out) => ShowOutcome::Up(parse_peer_keys(&out)),
            ShowOutcome::Down => ShowOutcome::Down,
        })
    }

    async fn latest_handshakes(
        &self,
        interface: &str,
    ) -> Result<ShowOutcome<HashMap<String, i64>>, WgError> {
        Ok(match self.run_show(interface, "latest-handshakes").await? {
            ShowOutcome::Up(out) => ShowOutcome::Up(parse_handshakes(&out)),
            ShowOutcome::Down => ShowOutcome::Down,
        })
    }

    async fn transfer(
        &self,
        interface: &str,
    ) -> Result<ShowOutcome<HashMap<String, TransferCounters>>, WgError> {
        Ok(match self.run_show(interface, "transfer").await? {
            ShowOutcome::Up(out) => ShowOutcome::Up(parse_transfer(&out)),
            ShowOutcome::Down => ShowOutcome::Down,
        })
    }

    async fn endpoints(
        &self,
        interface: &str,
    ) -> Result<ShowOutcome<HashMap<String, String>>, WgError> {
        Ok(match self.run_show(interface, "endpoints").await? {
            ShowOutcome::Up(out) => ShowOutcome::Up(parse_endpoints(&out)),
            ShowOutcome::Down => ShowOutcome::Down,
        })
    }

    async fn listen_port(&self, interface: &str) -> Result<ShowOutcome<String>, WgError> {
        Ok(match self.run_show(interface, "listen-port").await? {
            ShowOutcome::Up(out) => ShowOutcome::Up(out.trim().to_string()),
            ShowOutcome::Down => ShowOutcome::Down,
        })
    }

    async fn set_allowed_ips(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ips: &str,
    ) -> Result<(), WgError> {
        self.run_checked(
            "wg",
            &[
                "set",
                interface,
                "peer",
                public_key,
                "allowed-ips",
                allowed_ips,
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_preshared_key(
        &self,
        interface: &str,
        public_key: &str,
        preshared_key: &str,
    ) -> Result<(), WgError> {
        let mut psk_file = tempfile::NamedTempFile::new()?;
        psk_file.write_all(preshared_key.as_bytes())?;
        psk_file.flush()?;
        let path = psk_file.path().to_string_lossy().to_string();

        self.run_checked(
            "wg",
            &[
                "set",
                interface,
                "peer",
                public_key,
                "preshared-key",
                &path,
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), WgError> {
        self.run_checked("wg", &["set", interface, "peer", public_key, "remove"])
            .await?;
        Ok(())
    }

    async fn add_peers(&self, interface: &str, peers: &[PeerSpec]) -> Result<(), WgError> {
        if peers.is_empty() {
            return Ok(());
        }

        // Preshared keys must outlive the child process
        let mut psk_files = Vec::new();
        let mut args: Vec<String> = vec!["set".to_string(), interface.to_string()];
        for peer in peers {
            args.push("peer".to_string());
            args.push(peer.public_key.clone());
            if let Some(psk) = &peer.preshared_key {
                let mut file = tempfile::NamedTempFile::new()?;
                file.write_all(psk.as_bytes())?;
                file.flush()?;
                args.push("preshared-key".to_string());
                args.push(file.path().to_string_lossy().to_string());
                psk_files.push(file);
            }
            args.push("allowed-ips".to_string());
            args.push(peer.allowed_ips.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked("wg", &arg_refs).await?;
        drop(psk_files);
        Ok(())
    }

    async fn save(&self, interface: &str) -> Result<(), WgError> {
        self.run_checked("wg-quick", &["save", interface]).await?;
        Ok(())
    }

    async fn set_interface_state(&self, interface: &str, up: bool) -> Result<(), WgError> {
        let action = if up { "up" } else { "down" };
        self.run_checked("wg-quick", &[action, interface]).await?;
        Ok(())
    }

    async fn derive_public_key(&self, private_key: &str) -> Result<String, WgError> {
        let mut child = Command::new("wg")
            .arg("pubkey")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| WgError::Spawn {
                command: "wg pubkey".to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(private_key.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| WgError::Timeout {
                command: "wg pubkey".to_string(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            let text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WgError::Derivation(text));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn parse_peer_keys(output: &str) -> Vec<String> {
    output
        .split_whitespace()
        .map(|key| key.to_string())
        .collect()
}

/// Parse `latest-handshakes` output: `<peer>\t<unix-seconds>` per line.
/// Records with a missing or non-numeric timestamp are skipped.
fn parse_handshakes(output: &str) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split('\t');
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            warn!(line, "malformed handshake record, skipping");
            continue;
        };
        match value.trim().parse::<i64>() {
            Ok(ts) => {
                map.insert(key.to_string(), ts);
            }
            Err(_) => warn!(line, "non-numeric handshake timestamp, skipping"),
        }
    }
    map
}

/// Parse `transfer` output: `<peer>\t<received>\t<sent>` per line.
fn parse_transfer(output: &str) -> HashMap<String, TransferCounters> {
    let mut map = HashMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split('\t');
        let (Some(key), Some(received), Some(sent)) =
            (fields.next(), fields.next(), fields.next())
        else {
            warn!(line, "malformed transfer record, skipping");
            continue;
        };
        let (Ok(received), Ok(sent)) =
            (received.trim().parse::<u64>(), sent.trim().parse::<u64>())
        else {
            warn!(line, "non-numeric transfer counters, skipping");
            continue;
        };
        map.insert(key.to_string(), TransferCounters { received, sent });
    }
    map
}

/// Parse `endpoints` output: `<peer>\t<endpoint>` per line. The endpoint
/// text (including `(none)`) is kept verbatim.
fn parse_endpoints(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split('\t');
        let (Some(key), Some(endpoint)) = (fields.next(), fields.next()) else {
            warn!(line, "malformed endpoint record, skipping");
            continue;
        };
        map.insert(key.to_string(), endpoint.trim().to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handshakes_skips_bad_records() {
        let out = "keyA\t1700000000\nkeyB\tgarbage\nkeyC\t0\n\nkeyD";
        let map = parse_handshakes(out);
        assert_eq!(map.len(), 2);
        assert_eq!(map["keyA"], 1_700_000_000);
        assert_eq!(map["keyC"], 0);
    }

    #[test]
    fn parse_transfer_receives_then_sends() {
        let out = "keyA\t1024\t2048\nkeyB\t0\t0\n";
        let map = parse_transfer(out);
        assert_eq!(
            map["keyA"],
            TransferCounters {
                received: 1024,
                sent: 2048
            }
        );
        assert_eq!(map["keyB"], TransferCounters::default());
    }

    #[test]
    fn parse_transfer_skips_short_records() {
        let out = "keyA\t1024\nkeyB\t1\t2\t3\n";
        let map = parse_transfer(out);
        assert!(!map.contains_key("keyA"));
        // Trailing extra fields are ignored, the first three are used
        assert_eq!(
            map["keyB"],
            TransferCounters {
                received: 1,
                sent: 2
            }
        );
    }

    #[test]
    fn parse_endpoints_keeps_text_verbatim() {
        let out = "keyA\t203.0.113.5:51820\nkeyB\t(none)\n";
        let map = parse_endpoints(out);
        assert_eq!(map["keyA"], "203.0.113.5:51820");
        assert_eq!(map["keyB"], "(none)");
    }

    #[test]
    fn parse_peer_keys_splits_whitespace() {
        let keys = parse_peer_keys("keyA\nkeyB\nkeyC\n");
        assert_eq!(keys, vec!["keyA", "keyB", "keyC"]);
        assert!(parse_peer_keys("").is_empty());
    }
}
