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

//! Flat rows describing stored records, as printed by `list` commands.

use serde::{Deserialize, Serialize};

use crate::{Client, Interface};

/// One row of `interface list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    /// Interface name.
    pub interface: String,
    /// Endpoint handed to clients.
    pub endpoint: String,
    /// Server public key.
    pub public_key: String,
    /// Server IPv4 address with prefix.
    pub ipv4: Option<String>,
    /// Server IPv6 address with prefix.
    pub ipv6: Option<String>,
    /// Link MTU.
    pub mtu: u32,
    /// UDP listen port.
    pub listen_port: u16,
    /// DNS servers.
    pub dns: Vec<String>,
    /// Networks routed through the tunnel.
    pub allowed_ips: Vec<String>,
    /// Current pool position.
    pub address_shift: u32,
}

impl From<&Interface> for InterfaceSummary {
    fn from(iface: &Interface) -> Self {
        Self {
            interface: iface.name.clone(),
            endpoint: iface.endpoint.clone(),
            public_key: iface.public_key.clone(),
            ipv4: iface.ipv4.map(|n| n.to_string()),
            ipv6: iface.ipv6.map(|n| n.to_string()),
            mtu: iface.mtu,
            listen_port: iface.listen_port,
            dns: iface.dns.iter().map(ToString::to_string).collect(),
            allowed_ips: iface.allowed_ips.iter().map(ToString::to_string).collect(),
            address_shift: iface.address_shift,
        }
    }
}

/// One row of `client list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    /// Owning interface.
    pub interface: String,
    /// Client alias.
    pub client: String,
    /// Assigned IPv4 address.
    pub ipv4: Option<String>,
    /// Assigned IPv6 address.
    pub ipv6: Option<String>,
    /// Client public key.
    pub public_key: String,
}

impl From<&Client> for ClientSummary {
    fn from(client: &Client) -> Self {
        Self {
            interface: client.interface.clone(),
            client: client.alias.clone(),
            ipv4: client.ipv4.map(|a| a.to_string()),
            ipv6: client.ipv6.map(|a| a.to_string()),
            public_key: client.public_key.clone(),
        }
    }
}
