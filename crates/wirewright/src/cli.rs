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

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};

use crate::output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "Manage WireGuard interfaces and clients and render their configuration")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "WIREWRIGHT_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Path to the configuration file
    #[arg(long, env = "WIREWRIGHT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format for list commands
    #[arg(short = 'f', long, value_enum, default_value_t, global = true)]
    pub output_format: OutputFormat,

    /// Log filter, overrides RUST_LOG (e.g. "debug" or "wirewright=trace")
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage WireGuard interfaces
    #[command(subcommand)]
    Interface(InterfaceCommand),

    /// Manage clients of an interface
    #[command(subcommand)]
    Client(ClientCommand),

    /// Render server configuration files
    #[command(subcommand)]
    Render(RenderCommand),
}

#[derive(Debug, Subcommand)]
pub enum InterfaceCommand {
    /// Create an interface, replacing any existing one of the same name
    Add(InterfaceAddArgs),

    /// Change selected fields of an existing interface
    Update(InterfaceUpdateArgs),

    /// List all interfaces
    List,

    /// Remove an interface and all of its clients
    Remove {
        /// Interface name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct InterfaceAddArgs {
    /// Interface name (e.g. wg0)
    pub name: String,

    /// Endpoint clients connect to (host:port)
    #[arg(long)]
    pub endpoint: String,

    /// Server IPv4 address with prefix (e.g. 10.0.0.1/24)
    #[arg(long)]
    pub ipv4: Option<Ipv4Network>,

    /// Server IPv6 address with prefix (e.g. fd00::1/64)
    #[arg(long)]
    pub ipv6: Option<Ipv6Network>,

    #[arg(long, default_value_t = 1420)]
    pub mtu: u32,

    /// UDP listen port, 0 picks a random port
    #[arg(long, default_value_t = 51820)]
    pub listen_port: u16,

    /// DNS servers handed to clients
    #[arg(long, num_args = 1.., value_delimiter = ',', default_values = ["1.1.1.1", "8.8.8.8"])]
    pub dns: Vec<IpAddr>,

    /// Networks clients route through the tunnel
    #[arg(
        long,
        num_args = 1..,
        value_delimiter = ',',
        default_values = ["0.0.0.0/0", "2000::/3", "64:ff9b::/96"]
    )]
    pub allowed_ips: Vec<IpNetwork>,

    /// Keepalive interval in seconds
    #[arg(long, default_value_t = 15)]
    pub persistent_keepalive: u32,
}

#[derive(Debug, Args)]
pub struct InterfaceUpdateArgs {
    /// Interface name
    pub name: String,

    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long, conflicts_with = "no_ipv4")]
    pub ipv4: Option<Ipv4Network>,

    /// Remove the IPv4 address
    #[arg(long)]
    pub no_ipv4: bool,

    #[arg(long, conflicts_with = "no_ipv6")]
    pub ipv6: Option<Ipv6Network>,

    /// Remove the IPv6 address
    #[arg(long)]
    pub no_ipv6: bool,

    #[arg(long)]
    pub mtu: Option<u32>,

    /// UDP listen port, 0 picks a random port
    #[arg(long)]
    pub listen_port: Option<u16>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub dns: Option<Vec<IpAddr>>,

    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub allowed_ips: Option<Vec<IpNetwork>>,

    #[arg(long)]
    pub persistent_keepalive: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// Add a client and print its configuration
    Add {
        /// Interface name
        interface: String,

        /// Client alias, unique per interface
        alias: String,

        /// Also generate a pre-shared key
        #[arg(long)]
        preshared_key: bool,

        /// Re-issue an existing client with new keys and addresses
        #[arg(long)]
        force: bool,

        /// Print the configuration as a QR code
        #[arg(long)]
        qr: bool,
    },

    /// Remove clients from an interface
    Remove {
        /// Interface name
        interface: String,

        /// Aliases to remove
        #[arg(required = true)]
        aliases: Vec<String>,
    },

    /// List clients
    List {
        /// Only list clients of this interface
        #[arg(long)]
        interface: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum RenderCommand {
    /// wg-quick configuration (<name>.conf)
    Wgquick {
        /// Output directory [default: /etc/wireguard]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// systemd-networkd configuration (<name>.netdev, <name>.network)
    Systemd {
        /// Output directory [default: /etc/systemd/network]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
