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

use std::ops::RangeInclusive;
use std::path::PathBuf;

use rand::Rng;
use tracing::{error, info, warn};
use wirewright_types::report::{ClientSummary, InterfaceSummary};
use wirewright_types::{Interface, normalize_networks};

use crate::cli::{ClientCommand, Command, InterfaceAddArgs, InterfaceCommand, InterfaceUpdateArgs, RenderCommand};
use crate::config::Settings;
use crate::db::{IssuedClient, RecordStore, StoreError};
use crate::error::AppError;
use crate::keys;
use crate::render::{self, Target};

/// Range a listen port of 0 is replaced from.
pub const RANDOM_PORT_RANGE: RangeInclusive<u16> = 1024..=65000;

/// What a command produced, for the console surface to print.
#[derive(Debug)]
pub enum Report {
    Interfaces(Vec<InterfaceSummary>),
    Clients(Vec<ClientSummary>),
    ClientConfig { config: String, qr: Option<String> },
    Rendered(Vec<PathBuf>),
    Done,
}

type Result<T> = std::result::Result<T, AppError>;

/// Run one command against the invocation's store. The caller owns the
/// transaction and decides to commit or roll back from the result.
pub async fn execute(store: &mut RecordStore, command: Command, settings: &Settings) -> Result<Report> {
    match command {
        Command::Interface(cmd) => match cmd {
            InterfaceCommand::Add(args) => add_interface(store, args).await,
            InterfaceCommand::Update(args) => update_interface(store, args).await,
            InterfaceCommand::List => list_interfaces(store).await,
            InterfaceCommand::Remove { name } => remove_interface(store, &name).await,
        },
        Command::Client(cmd) => match cmd {
            ClientCommand::Add {
                interface,
                alias,
                preshared_key,
                force,
                qr,
            } => add_client(store, &interface, &alias, preshared_key, force, qr).await,
            ClientCommand::Remove { interface, aliases } => {
                remove_clients(store, &interface, &aliases).await
            }
            ClientCommand::List { interface } => list_clients(store, interface.as_deref()).await,
        },
        Command::Render(cmd) => {
            let (target, output) = match cmd {
                RenderCommand::Wgquick { output } => (Target::WgQuick, output),
                RenderCommand::Systemd { output } => (Target::Systemd, output),
            };
            let dir = output.unwrap_or_else(|| settings.render_dir(target).to_path_buf());
            render_all(store, target, dir).await
        }
    }
}

fn resolve_port(port: u16) -> u16 {
    if port != 0 {
        return port;
    }
    let port = rand::thread_rng().gen_range(RANDOM_PORT_RANGE);
    info!(port, "picked random listen port");
    port
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

async fn add_interface(store: &mut RecordStore, args: InterfaceAddArgs) -> Result<Report> {
    let created_at = match store.find_interface(&args.name).await? {
        Some(existing) => {
            warn!(interface = %args.name, "replacing existing interface");
            existing.created_at
        }
        None => wirewright_types::now(),
    };

    let keypair = keys::generate_keypair();
    let iface = Interface {
        name: args.name,
        ipv4: args.ipv4,
        ipv6: args.ipv6,
        private_key: keypair.private_key,
        public_key: keypair.public_key,
        mtu: args.mtu,
        listen_port: resolve_port(args.listen_port),
        endpoint: args.endpoint,
        dns: args.dns,
        allowed_ips: normalize_networks(args.allowed_ips),
        persistent_keepalive: args.persistent_keepalive,
        address_shift: 1,
        created_at,
    };
    store.save_interface(&iface).await?;

    info!(interface = %iface.name, "interface saved");
    Ok(Report::Interfaces(vec![InterfaceSummary::from(&iface)]))
}

async fn update_interface(store: &mut RecordStore, args: InterfaceUpdateArgs) -> Result<Report> {
    let mut iface = store.load_interface(&args.name).await?;

    if let Some(endpoint) = args.endpoint {
        iface.endpoint = endpoint;
    }
    if args.no_ipv4 {
        iface.ipv4 = None;
    } else if let Some(ipv4) = args.ipv4 {
        iface.ipv4 = Some(ipv4);
    }
    if args.no_ipv6 {
        iface.ipv6 = None;
    } else if let Some(ipv6) = args.ipv6 {
        iface.ipv6 = Some(ipv6);
    }
    if let Some(mtu) = args.mtu {
        iface.mtu = mtu;
    }
    if let Some(port) = args.listen_port {
        iface.listen_port = resolve_port(port);
    }
    if let Some(dns) = args.dns {
        iface.dns = dns;
    }
    if let Some(allowed_ips) = args.allowed_ips {
        iface.allowed_ips = normalize_networks(allowed_ips);
    }
    if let Some(keepalive) = args.persistent_keepalive {
        iface.persistent_keepalive = keepalive;
    }

    store.save_interface(&iface).await?;

    info!(interface = %iface.name, "interface updated");
    Ok(Report::Interfaces(vec![InterfaceSummary::from(&iface)]))
}

async fn list_interfaces(store: &mut RecordStore) -> Result<Report> {
    let interfaces = store.list_interfaces().await?;
    Ok(Report::Interfaces(interfaces.iter().map(InterfaceSummary::from).collect()))
}

async fn remove_interface(store: &mut RecordStore, name: &str) -> Result<Report> {
    store.load_interface(name).await?;
    store.remove_interface(name).await?;
    Ok(Report::Done)
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

async fn add_client(
    store: &mut RecordStore,
    interface: &str,
    alias: &str,
    preshared: bool,
    force: bool,
    qr: bool,
) -> Result<Report> {
    let issued = store.create_client(interface, alias, preshared, force).await?;
    check_issued_keys(&issued)?;
    let config = render::client_config(&issued.interface, &issued.client, &issued.private_key);
    let qr = if qr { Some(render::qr_code(&config)?) } else { None };
    Ok(Report::ClientConfig { config, qr })
}

/// Refuse to hand out a config whose keys would not work: the server key
/// must decode, and the client's private key must match its stored public key.
fn check_issued_keys(issued: &IssuedClient) -> std::result::Result<(), StoreError> {
    if keys::decode_key(&issued.interface.public_key).is_none() {
        return Err(StoreError::Corrupt {
            column: "interfaces.public_key",
            value: issued.interface.public_key.clone(),
        });
    }
    if keys::public_key_for(&issued.private_key).as_deref() != Some(issued.client.public_key.as_str()) {
        return Err(StoreError::Corrupt {
            column: "clients.public_key",
            value: issued.client.public_key.clone(),
        });
    }
    Ok(())
}

async fn remove_clients(store: &mut RecordStore, interface: &str, aliases: &[String]) -> Result<Report> {
    for alias in aliases {
        if store.remove_client(alias, interface).await? {
            info!(alias, interface, "client removed");
        } else {
            error!(alias, interface, "client not found");
        }
    }
    Ok(Report::Done)
}

async fn list_clients(store: &mut RecordStore, interface: Option<&str>) -> Result<Report> {
    let names: Vec<String> = match interface {
        Some(name) => vec![store.load_interface(name).await?.name],
        None => store.list_interfaces().await?.into_iter().map(|i| i.name).collect(),
    };

    let mut rows = Vec::new();
    for name in &names {
        rows.extend(store.list_clients(name).await?.iter().map(ClientSummary::from));
    }
    Ok(Report::Clients(rows))
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

async fn render_all(store: &mut RecordStore, target: Target, dir: PathBuf) -> Result<Report> {
    let snapshots = store.load_snapshots().await?;
    let written = render::write_all(target, &dir, &snapshots).await?;
    Ok(Report::Rendered(written))
}
