//! Free address computation for an interface's subnet.
//!
//! The pool is derived fresh on every call from the configured subnet(s)
//! minus the addresses already in use; it is never cached, since peer
//! assignments can change between calls. Batch allocation takes addresses
//! from the front of the returned list.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use tracing::debug;

/// Collect the host portion (before `/`) of every entry in a list of
/// comma-separated CIDR strings. Placeholders such as `(None)` or `N/A`
/// and unparseable entries contribute nothing.
pub fn in_use_hosts(assignments: &[String]) -> HashSet<IpAddr> {
    let mut hosts = HashSet::new();
    for assignment in assignments {
        for entry in assignment.split(',') {
            let host = entry.split('/').next().unwrap_or("").trim();
            if let Ok(addr) = host.parse::<IpAddr>() {
                hosts.insert(addr);
            }
        }
    }
    hosts
}

/// Host addresses of the configured subnet(s) not currently assigned,
/// ascending within each subnet; network and broadcast addresses are
/// excluded. `subnets` are the interface's `Address` entries, `in_use`
/// everything already taken (the interface's own addresses plus every
/// peer's allowed-IP assignment).
pub fn available_ips(subnets: &[String], in_use: &[String]) -> Vec<IpAddr> {
    let taken = in_use_hosts(in_use);
    let mut seen = HashSet::new();
    let mut available = Vec::new();

    for subnet in subnets {
        let Ok(net) = subnet.trim().parse::<IpNet>() else {
            debug!(subnet, "unparseable subnet, skipping");
            continue;
        };
        for host in net.trunc().hosts() {
            if !taken.contains(&host) && seen.insert(host) {
                available.push(host);
            }
        }
    }

    available
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn excludes_network_broadcast_and_in_use() {
        let subnets = strings(&["10.8.0.1/29"]);
        let in_use = strings(&["10.8.0.1/29", "10.8.0.3/32"]);
        let free = available_ips(&subnets, &in_use);

        let rendered: Vec<String> = free.iter().map(|a| a.to_string()).collect();
        assert_eq!(rendered, vec!["10.8.0.2", "10.8.0.4", "10.8.0.5", "10.8.0.6"]);
    }

    #[test]
    fn disjoint_from_any_in_use_set() {
        let subnets = strings(&["192.0.2.0/28"]);
        let in_use = strings(&[
            "192.0.2.1/32",
            "192.0.2.5/32, 192.0.2.9/32",
            "(None)",
            "N/A",
        ]);
        let taken = in_use_hosts(&in_use);
        let free = available_ips(&subnets, &in_use);

        for addr in &free {
            assert!(!taken.contains(addr));
        }
        assert!(!free.iter().any(|a| a.to_string() == "192.0.2.0"));
        assert!(!free.iter().any(|a| a.to_string() == "192.0.2.15"));
    }

    #[test]
    fn ascending_order() {
        let free = available_ips(&strings(&["10.0.0.0/29"]), &[]);
        let mut sorted = free.clone();
        sorted.sort();
        assert_eq!(free, sorted);
    }

    #[test]
    fn multiple_subnets_deduplicated() {
        let subnets = strings(&["10.8.0.0/30", "10.8.0.0/29"]);
        let free = available_ips(&subnets, &[]);
        let unique: HashSet<&IpAddr> = free.iter().collect();
        assert_eq!(unique.len(), free.len());
    }

    #[test]
    fn comma_separated_allowed_ips_all_count() {
        let in_use = strings(&["10.8.0.2/32, 10.8.0.3/32"]);
        let hosts = in_use_hosts(&in_use);
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn bad_subnet_yields_nothing() {
        assert!(available_ips(&strings(&["not-a-subnet"]), &[]).is_empty());
    }
}
