//! Interface configuration file reader.
//!
//! Parses the `[Interface]` and `[Peer]` sections of a wg-quick style
//! `.conf` file. The engine treats these files as read-only: they are
//! mutated only by `wg-quick save` and external tooling.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::ConfError;

/// Parsed contents of one interface configuration file.
#[derive(Debug, Clone, Default)]
pub struct InterfaceConf {
    /// Interface name (file stem)
    pub name: String,
    /// `Address` entries, split on commas
    pub addresses: Vec<String>,
    /// `ListenPort`, when present
    pub listen_port: Option<String>,
    /// `PrivateKey`, when present
    pub private_key: Option<String>,
    /// `[Peer]` sections in file order
    pub peers: Vec<PeerConf>,
}

/// One `[Peer]` section.
#[derive(Debug, Clone, Default)]
pub struct PeerConf {
    pub public_key: Option<String>,
    pub preshared_key: Option<String>,
    pub allowed_ips: Option<String>,
}

/// List the interface names in a configuration directory (`*.conf` stems),
/// sorted ascending. This set is the source of truth for which interface
/// identifiers are valid.
pub fn list_interfaces(dir: impl AsRef<Path>) -> Result<Vec<String>, ConfError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| ConfError::List {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("conf") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Load and parse one interface configuration file.
pub fn load_interface(dir: impl AsRef<Path>, name: &str) -> Result<InterfaceConf, ConfError> {
    let path = conf_path(dir.as_ref(), name);
    let content = fs::read_to_string(&path).map_err(|source| ConfError::Read {
        path: path.clone(),
        source,
    })?;
    Ok(parse_conf(name, &content))
}

fn conf_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.conf"))
}

/// Parse the configuration text. Lines are `key = value` pairs split on
/// the first `=`; `#` and `;` lines are comments. Unparseable lines are
/// skipped, never fatal.
pub fn parse_conf(name: &str, content: &str) -> InterfaceConf {
    #[derive(PartialEq)]
    enum Section {
        None,
        Interface,
        Peer,
    }

    let mut conf = InterfaceConf {
        name: name.to_string(),
        ..Default::default()
    };
    let mut section = Section::None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.eq_ignore_ascii_case("[Interface]") {
            section = Section::Interface;
            continue;
        }
        if line.eq_ignore_ascii_case("[Peer]") {
            section = Section::Peer;
            conf.peers.push(PeerConf::default());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warn!(interface = name, line, "unparseable config line, skipping");
            continue;
        };
        let key = key.trim();
        let value = value.trim().to_string();

        match section {
            Section::Interface => match key {
                "Address" => {
                    conf.addresses
                        .extend(value.split(',').map(|a| a.trim().to_string()));
                }
                "ListenPort" => conf.listen_port = Some(value),
                "PrivateKey" => conf.private_key = Some(value),
                _ => {}
            },
            Section::Peer => {
                if let Some(peer) = conf.peers.last_mut() {
                    match key {
                        "PublicKey" => peer.public_key = Some(value),
                        "PresharedKey" => peer.preshared_key = Some(value),
                        "AllowedIPs" => peer.allowed_ips = Some(value),
                        _ => {}
                    }
                }
            }
            Section::None => {}
        }
    }

    conf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
[Interface]
Address = 10.8.0.1/24, fd42::1/64
ListenPort = 51820
PrivateKey = aW50ZXJmYWNlcHJpdmF0ZWtleWludGVyZmFjZXByaXY=
# a comment
; another comment

[Peer]
PublicKey = peerApeerApeerApeerApeerApeerApeerApeerAp0=
AllowedIPs = 10.8.0.2/32
PersistentKeepalive = 21

[Peer]
PublicKey = peerBpeerBpeerBpeerBpeerBpeerBpeerBpeerBp0=
PresharedKey = cHNrcHNrcHNrcHNrcHNrcHNrcHNrcHNrcHNrcHNrcHM=
AllowedIPs = 10.8.0.3/32

[Peer]
AllowedIPs = 10.8.0.4/32
";

    #[test]
    fn parses_interface_section() {
        let conf = parse_conf("wg0", SAMPLE);
        assert_eq!(conf.name, "wg0");
        assert_eq!(conf.addresses, vec!["10.8.0.1/24", "fd42::1/64"]);
        assert_eq!(conf.listen_port.as_deref(), Some("51820"));
        assert!(conf.private_key.is_some());
    }

    #[test]
    fn parses_all_peer_sections() {
        let conf = parse_conf("wg0", SAMPLE);
        assert_eq!(conf.peers.len(), 3);
        assert_eq!(
            conf.peers[0].public_key.as_deref(),
            Some("peerApeerApeerApeerApeerApeerApeerApeerAp0=")
        );
        assert_eq!(conf.peers[0].allowed_ips.as_deref(), Some("10.8.0.2/32"));
        assert!(conf.peers[0].preshared_key.is_none());
        assert!(conf.peers[1].preshared_key.is_some());
        // A peer without a public key is kept; the engine skips it later
        assert!(conf.peers[2].public_key.is_none());
    }

    #[test]
    fn value_with_equals_is_kept_whole() {
        let conf = parse_conf("wg0", "[Interface]\nPrivateKey = abc=def==\n");
        assert_eq!(conf.private_key.as_deref(), Some("abc=def=="));
    }

    #[test]
    fn lists_conf_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["wg1.conf", "wg0.conf", "notes.txt"] {
            let mut f = fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(b"[Interface]\n").unwrap();
        }
        let names = list_interfaces(dir.path()).unwrap();
        assert_eq!(names, vec!["wg0", "wg1"]);
    }

    #[test]
    fn load_missing_interface_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_interface(dir.path(), "wg9").is_err());
    }
}
