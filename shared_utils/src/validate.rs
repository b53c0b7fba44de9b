//! Field validation for peer mutation requests.
//!
//! Every mutating request is validated here before any external `wg`
//! invocation is attempted, with a specific reason per field.

use std::net::IpAddr;
use thiserror::Error;

/// A rejected request field, with a human-readable reason.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("DNS format is incorrect: {0}")]
    Dns(String),

    #[error("Allowed IPs format is incorrect: {0}")]
    AllowedIps(String),

    #[error("MTU format is not correct: {0}")]
    Mtu(String),

    #[error("Persistent keepalive format is not correct: {0}")]
    Keepalive(String),

    #[error("Key format is not correct: {0}")]
    Key(String),
}

/// Validate a comma-separated list of DNS servers (IP addresses or hostnames).
pub fn check_dns(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Dns("list is empty".to_string()));
    }
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.parse::<IpAddr>().is_ok() {
            continue;
        }
        if !is_hostname(entry) {
            return Err(ValidationError::Dns(format!(
                "'{entry}' is not an IP address or hostname"
            )));
        }
    }
    Ok(())
}

/// Validate a comma-separated list of CIDR entries (e.g. "10.0.0.2/32, 0.0.0.0/0").
pub fn check_allowed_ips(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::AllowedIps("list is empty".to_string()));
    }
    for entry in value.split(',') {
        let entry = entry.trim();
        check_cidr(entry).map_err(ValidationError::AllowedIps)?;
    }
    Ok(())
}

/// Validate a single `address/prefix` CIDR string.
fn check_cidr(entry: &str) -> Result<(), String> {
    let Some((addr, prefix)) = entry.split_once('/') else {
        return Err(format!("'{entry}' is missing a /prefix"));
    };
    let addr: IpAddr = addr
        .trim()
        .parse()
        .map_err(|_| format!("'{entry}' has an invalid address"))?;
    let prefix: u8 = prefix
        .trim()
        .parse()
        .map_err(|_| format!("'{entry}' has an invalid prefix length"))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("'{entry}' prefix length exceeds {max}"));
    }
    Ok(())
}

/// Validate an MTU field supplied as text.
pub fn check_mtu(value: &str) -> Result<u32, ValidationError> {
    let mtu: u32 = value
        .trim()
        .parse()
        .map_err(|_| ValidationError::Mtu(format!("'{value}' is not a number")))?;
    if !(576..=9200).contains(&mtu) {
        return Err(ValidationError::Mtu(format!("{mtu} is outside 576..=9200")));
    }
    Ok(mtu)
}

/// Validate a persistent-keepalive field supplied as text.
pub fn check_keepalive(value: &str) -> Result<u32, ValidationError> {
    let keepalive: u32 = value
        .trim()
        .parse()
        .map_err(|_| ValidationError::Keepalive(format!("'{value}' is not a number")))?;
    if keepalive > 3600 {
        return Err(ValidationError::Keepalive(format!(
            "{keepalive} is outside 0..=3600"
        )));
    }
    Ok(keepalive)
}

/// Validate the shape of a WireGuard key (44 base64 characters, 32 raw bytes).
pub fn check_wg_key(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.len() != 44 || !value.ends_with('=') {
        return Err(ValidationError::Key(
            "expected 44 base64 characters ending in '='".to_string(),
        ));
    }
    let body = &value[..43];
    if !body
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return Err(ValidationError::Key(
            "contains non-base64 characters".to_string(),
        ));
    }
    Ok(())
}

fn is_hostname(entry: &str) -> bool {
    if entry.is_empty() || entry.len() > 253 {
        return false;
    }
    entry.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_accepts_addresses_and_hostnames() {
        assert!(check_dns("1.1.1.1").is_ok());
        assert!(check_dns("1.1.1.1, 8.8.8.8").is_ok());
        assert!(check_dns("dns.example.com").is_ok());
        assert!(check_dns("2606:4700:4700::1111").is_ok());
    }

    #[test]
    fn dns_rejects_garbage() {
        assert!(check_dns("").is_err());
        assert!(check_dns("1.1.1.1, not a host!").is_err());
        assert!(check_dns("-leading.dash").is_err());
    }

    #[test]
    fn allowed_ips_require_cidr() {
        assert!(check_allowed_ips("10.0.0.2/32").is_ok());
        assert!(check_allowed_ips("0.0.0.0/0, ::/0").is_ok());
        assert!(check_allowed_ips("10.0.0.2").is_err());
        assert!(check_allowed_ips("10.0.0.2/33").is_err());
        assert!(check_allowed_ips("").is_err());
    }

    #[test]
    fn mtu_and_keepalive_bounds() {
        assert_eq!(check_mtu("1420").unwrap(), 1420);
        assert!(check_mtu("100").is_err());
        assert!(check_mtu("abc").is_err());
        assert_eq!(check_keepalive("21").unwrap(), 21);
        assert!(check_keepalive("9999").is_err());
    }

    #[test]
    fn wg_key_shape() {
        assert!(check_wg_key("dGVzdGtleXRlc3RrZXl0ZXN0a2V5dGVzdGtleXRlc3Q=").is_ok());
        assert!(check_wg_key("short=").is_err());
        assert!(check_wg_key("dGVzdGtleXRlc3RrZXl0ZXN0a2V5dGVzdGtleXRlc3Q!").is_err());
    }
}
