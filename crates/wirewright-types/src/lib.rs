// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! wirewright-types: record model for the wirewright configuration generator.
//!
//! This crate holds the interface and client records, the sequential address
//! pool, the storage-independent validation rules, and the report rows handed
//! to the console surface.

#![warn(missing_docs)]

pub mod pool;
pub mod report;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{NaiveDateTime, Timelike, Utc};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};

use crate::pool::{Allocation, Family, PoolError};

/// Fixed text form of every persisted timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest name the kernel accepts for a network link.
pub const MAX_INTERFACE_NAME: usize = 15;

/// Current UTC wall clock, truncated to whole seconds so it survives the
/// text round trip unchanged.
pub fn now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Invalid interface name or client alias.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Name was empty.
    #[error("name must not be empty")]
    Empty,

    /// Name is longer than a network link name may be.
    #[error("interface name {0:?} is longer than {MAX_INTERFACE_NAME} bytes")]
    TooLong(String),

    /// Name contains a character that is unsafe in a file or link name.
    #[error("interface name {0:?} may only contain ASCII letters, digits and _=+.-")]
    InvalidCharacter(String),

    /// Alias contains a control character such as a newline.
    #[error("client alias {0:?} contains a control character")]
    ControlCharacter(String),
}

/// Check that `name` is usable both as a link name and as a file stem.
pub fn validate_interface_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_INTERFACE_NAME {
        return Err(NameError::TooLong(name.to_string()));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-');
    if name == "." || name == ".." || !name.chars().all(allowed) {
        return Err(NameError::InvalidCharacter(name.to_string()));
    }
    Ok(())
}

/// Check a client alias: non-empty, single line.
pub fn validate_alias(alias: &str) -> Result<(), NameError> {
    if alias.trim().is_empty() {
        return Err(NameError::Empty);
    }
    if alias.chars().any(char::is_control) {
        return Err(NameError::ControlCharacter(alias.to_string()));
    }
    Ok(())
}

/// Sort and de-duplicate a set of networks: IPv4 before IPv6, then by
/// address, then by prefix length.
pub fn normalize_networks(mut networks: Vec<IpNetwork>) -> Vec<IpNetwork> {
    networks.sort_by_key(|n| (n.ip(), n.prefix()));
    networks.dedup();
    networks
}

/// A tunnel endpoint (one WireGuard interface on the server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Unique name, also the link and file name (e.g. "wg0").
    pub name: String,
    /// Server IPv4 address and the prefix of its subnet.
    pub ipv4: Option<Ipv4Network>,
    /// Server IPv6 address and the prefix of its subnet.
    pub ipv6: Option<Ipv6Network>,
    /// WireGuard private key (base64).
    pub private_key: String,
    /// WireGuard public key (base64).
    pub public_key: String,
    /// Link MTU.
    pub mtu: u32,
    /// UDP listen port.
    pub listen_port: u16,
    /// Endpoint (host:port) handed to clients.
    pub endpoint: String,
    /// DNS servers handed to clients, in order.
    pub dns: Vec<IpAddr>,
    /// Networks clients route through the tunnel, sorted.
    pub allowed_ips: Vec<IpNetwork>,
    /// Keepalive interval in seconds.
    pub persistent_keepalive: u32,
    /// Number of client addresses ever allocated, plus one. Never decreases.
    pub address_shift: u32,
    /// When the interface was first created.
    pub created_at: NaiveDateTime,
}

impl Interface {
    /// The interface's own addresses, IPv4 first.
    pub fn addresses(&self) -> Vec<IpNetwork> {
        let mut out = Vec::with_capacity(2);
        if let Some(v4) = self.ipv4 {
            out.push(IpNetwork::V4(v4));
        }
        if let Some(v6) = self.ipv6 {
            out.push(IpNetwork::V6(v6));
        }
        out
    }

    /// Reject subnets with no room for a single client.
    pub fn check_address_space(&self) -> Result<(), PoolError> {
        pool::check_address_space(self.ipv4, self.ipv6)
    }

    /// The addresses the next client would receive, without consuming them.
    pub fn next_allocation(&self) -> Result<Allocation, PoolError> {
        pool::allocate(self.ipv4, self.ipv6, self.address_shift)
    }

    /// First address family in which `self` and `other` share addresses.
    pub fn overlapping_family(&self, other: &Interface) -> Option<Family> {
        match (self.ipv4, other.ipv4) {
            (Some(a), Some(b)) if pool::overlaps_v4(a, b) => return Some(Family::V4),
            _ => {}
        }
        match (self.ipv6, other.ipv6) {
            (Some(a), Some(b)) if pool::overlaps_v6(a, b) => Some(Family::V6),
            _ => None,
        }
    }

    /// Allocate addresses for a new client and advance the pool.
    ///
    /// On failure the interface is left untouched.
    pub fn issue_client(
        &mut self,
        alias: &str,
        public_key: String,
        preshared_key: Option<String>,
    ) -> Result<Client, PoolError> {
        let Allocation { ipv4, ipv6 } = self.next_allocation()?;
        self.address_shift += 1;
        Ok(Client {
            interface: self.name.clone(),
            alias: alias.to_string(),
            public_key,
            preshared_key,
            ipv4,
            ipv6,
            created_at: now(),
        })
    }
}

/// A peer attached to exactly one [`Interface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Name of the owning interface.
    pub interface: String,
    /// Alias, unique within the interface.
    pub alias: String,
    /// WireGuard public key (base64).
    pub public_key: String,
    /// Optional pre-shared key (base64).
    pub preshared_key: Option<String>,
    /// Assigned IPv4 address.
    pub ipv4: Option<Ipv4Addr>,
    /// Assigned IPv6 address.
    pub ipv6: Option<Ipv6Addr>,
    /// When the client was created.
    pub created_at: NaiveDateTime,
}

impl Client {
    /// The client's addresses as host networks (/32, /128), IPv4 first.
    pub fn host_networks(&self) -> Vec<IpNetwork> {
        let mut out = Vec::with_capacity(2);
        if let Some(v4) = self.ipv4 {
            out.push(IpNetwork::V4(Ipv4Network::from(v4)));
        }
        if let Some(v6) = self.ipv6 {
            out.push(IpNetwork::V6(Ipv6Network::from(v6)));
        }
        out
    }

    /// The client's bare addresses, IPv4 first.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample_interface(ipv4: Option<&str>, ipv6: Option<&str>) -> Interface {
        Interface {
            name: "wg0".to_string(),
            ipv4: ipv4.map(|s| s.parse().unwrap()),
            ipv6: ipv6.map(|s| s.parse().unwrap()),
            private_key: "priv".to_string(),
            public_key: "pub".to_string(),
            mtu: 1420,
            listen_port: 51820,
            endpoint: "vpn.example.com:51820".to_string(),
            dns: vec!["1.1.1.1".parse().unwrap()],
            allowed_ips: vec!["0.0.0.0/0".parse().unwrap()],
            persistent_keepalive: 15,
            address_shift: 1,
            created_at: now(),
        }
    }

    #[test_case("wg0", true ; "simple")]
    #[test_case("wg-office.1", true ; "punctuation")]
    #[test_case("", false ; "empty")]
    #[test_case("abcdefghijklmnop", false ; "sixteen bytes")]
    #[test_case("../etc", false ; "path traversal")]
    #[test_case("..", false ; "dot dot")]
    #[test_case("wg 0", false ; "whitespace")]
    fn test_validate_interface_name(name: &str, ok: bool) {
        assert_eq!(validate_interface_name(name).is_ok(), ok);
    }

    #[test_case("alice", true ; "simple")]
    #[test_case("Dad's laptop", true ; "spaces and quotes")]
    #[test_case("  ", false ; "blank")]
    #[test_case("a\n[Peer]", false ; "newline")]
    fn test_validate_alias(alias: &str, ok: bool) {
        assert_eq!(validate_alias(alias).is_ok(), ok);
    }

    #[test]
    fn issue_client_advances_shift() {
        let mut iface = sample_interface(Some("10.0.0.1/24"), Some("fd00::1/64"));
        let alice = iface.issue_client("alice", "a".into(), None).unwrap();
        let bob = iface.issue_client("bob", "b".into(), Some("psk".into())).unwrap();

        assert_eq!(alice.ipv4, Some("10.0.0.2".parse().unwrap()));
        assert_eq!(alice.ipv6, Some("fd00::2".parse().unwrap()));
        assert_eq!(bob.ipv4, Some("10.0.0.3".parse().unwrap()));
        assert_eq!(bob.preshared_key.as_deref(), Some("psk"));
        assert_eq!(bob.interface, "wg0");
        assert_eq!(iface.address_shift, 3);
    }

    #[test]
    fn issue_client_failure_leaves_shift() {
        let mut iface = sample_interface(Some("10.0.0.1/30"), None);
        iface.issue_client("c1", "k".into(), None).unwrap();
        iface.issue_client("c2", "k".into(), None).unwrap();
        let err = iface.issue_client("c3", "k".into(), None).unwrap_err();

        assert!(matches!(err, PoolError::Exhausted { family: Family::V4, .. }));
        assert_eq!(iface.address_shift, 3);
    }

    #[test]
    fn overlapping_family_ignores_missing_family() {
        let a = sample_interface(Some("10.0.0.1/24"), None);
        let b = sample_interface(None, Some("fd00::1/64"));
        let c = sample_interface(Some("10.0.0.200/25"), Some("fd00::1/64"));

        assert_eq!(a.overlapping_family(&b), None);
        assert_eq!(a.overlapping_family(&c), Some(Family::V4));
        assert_eq!(b.overlapping_family(&c), Some(Family::V6));
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let nets: Vec<IpNetwork> = ["2000::/3", "0.0.0.0/0", "64:ff9b::/96", "0.0.0.0/0"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let sorted: Vec<String> = normalize_networks(nets).iter().map(ToString::to_string).collect();
        assert_eq!(sorted, ["0.0.0.0/0", "64:ff9b::/96", "2000::/3"]);
    }

    #[test]
    fn client_host_networks() {
        let mut iface = sample_interface(Some("10.0.0.1/24"), Some("fd00::1/64"));
        let client = iface.issue_client("alice", "k".into(), None).unwrap();
        let nets: Vec<String> = client.host_networks().iter().map(ToString::to_string).collect();
        assert_eq!(nets, ["10.0.0.2/32", "fd00::2/128"]);
    }
}
