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

//! Sequential address pool.
//!
//! A client address is the interface's own address advanced by the interface's
//! `address_shift`. The shift only ever grows, so an address handed out once is
//! never handed out again, even after the client holding it is removed.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};

/// Address family of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("IPv4"),
            Self::V6 => f.write_str("IPv6"),
        }
    }
}

/// Address pool failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The subnet cannot hold even one client next to the server address.
    #[error("{family} network {network} has no room for client addresses (server address {address})")]
    AddressSpaceInvalid {
        /// Family of the rejected subnet.
        family: Family,
        /// The subnet in `network/prefix` form.
        network: String,
        /// The interface's own address inside it.
        address: String,
    },

    /// Every address after the server address has been handed out.
    #[error("{family} address pool exhausted for {network}")]
    Exhausted {
        /// Family that ran out.
        family: Family,
        /// The subnet in `network/prefix` form.
        network: String,
    },
}

/// Addresses picked for one new client. A family the interface does not
/// configure stays `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Client IPv4 address.
    pub ipv4: Option<Ipv4Addr>,
    /// Client IPv6 address.
    pub ipv6: Option<Ipv6Addr>,
}

/// Canonical `network/prefix` form of the subnet an interface address sits in.
pub fn subnet_v4(net: Ipv4Network) -> String {
    format!("{}/{}", net.network(), net.prefix())
}

/// IPv6 counterpart of [`subnet_v4`].
pub fn subnet_v6(net: Ipv6Network) -> String {
    format!("{}/{}", net.network(), net.prefix())
}

/// The address `shift` positions after `net.ip()`, if it is still inside `net`.
pub fn offset_v4(net: Ipv4Network, shift: u32) -> Option<Ipv4Addr> {
    let candidate = Ipv4Addr::from(u32::from(net.ip()).checked_add(shift)?);
    net.contains(candidate).then_some(candidate)
}

/// IPv6 counterpart of [`offset_v4`]. The shift is widened, never truncated.
pub fn offset_v6(net: Ipv6Network, shift: u32) -> Option<Ipv6Addr> {
    let candidate = Ipv6Addr::from(u128::from(net.ip()).checked_add(u128::from(shift))?);
    net.contains(candidate).then_some(candidate)
}

/// Allocate the addresses for shift `shift`. Fails if any configured family
/// has run out; in that case nothing is allocated for either family.
pub fn allocate(
    ipv4: Option<Ipv4Network>,
    ipv6: Option<Ipv6Network>,
    shift: u32,
) -> Result<Allocation, PoolError> {
    let ipv4 = match ipv4 {
        Some(net) => Some(offset_v4(net, shift).ok_or_else(|| PoolError::Exhausted {
            family: Family::V4,
            network: subnet_v4(net),
        })?),
        None => None,
    };
    let ipv6 = match ipv6 {
        Some(net) => Some(offset_v6(net, shift).ok_or_else(|| PoolError::Exhausted {
            family: Family::V6,
            network: subnet_v6(net),
        })?),
        None => None,
    };
    Ok(Allocation { ipv4, ipv6 })
}

/// Reject subnets with no room for even the first client (shift = 1).
///
/// An interface that passes may still run out on its second client; exact
/// exhaustion is only detected by [`allocate`].
pub fn check_address_space(
    ipv4: Option<Ipv4Network>,
    ipv6: Option<Ipv6Network>,
) -> Result<(), PoolError> {
    if let Some(net) = ipv4.filter(|net| offset_v4(*net, 1).is_none()) {
        return Err(PoolError::AddressSpaceInvalid {
            family: Family::V4,
            network: subnet_v4(net),
            address: net.ip().to_string(),
        });
    }
    if let Some(net) = ipv6.filter(|net| offset_v6(*net, 1).is_none()) {
        return Err(PoolError::AddressSpaceInvalid {
            family: Family::V6,
            network: subnet_v6(net),
            address: net.ip().to_string(),
        });
    }
    Ok(())
}

/// Two CIDR blocks share an address iff one contains the other's network
/// address.
pub fn overlaps_v4(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// IPv6 counterpart of [`overlaps_v4`].
pub fn overlaps_v6(a: Ipv6Network, b: Ipv6Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}
