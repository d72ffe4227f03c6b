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

//! Text renderers for the stored records.
//!
//! Every function here is a pure function of the records it is given; only
//! [`write_all`] touches the filesystem.

use std::fmt::{Display, Write};
use std::path::{Path, PathBuf};

use qrcode::QrCode;
use qrcode::render::unicode::Dense1x2;
use tokio::io::AsyncWriteExt;
use tracing::info;
use wirewright_types::{Client, Interface};

use crate::db::InterfaceSnapshot;

/// Mode of every rendered file: owner read/write, group read.
pub const FILE_MODE: u32 = 0o640;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode QR code: {0}")]
    Qr(String),
}

/// Output flavor of `render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One `<name>.conf` per interface, for wg-quick.
    WgQuick,
    /// `<name>.netdev` and `<name>.network` per interface, for systemd-networkd.
    Systemd,
}

impl Target {
    pub fn default_dir(self) -> &'static Path {
        match self {
            Self::WgQuick => Path::new("/etc/wireguard"),
            Self::Systemd => Path::new("/etc/systemd/network"),
        }
    }

    /// File names and contents for one interface.
    pub fn files(self, snapshot: &InterfaceSnapshot) -> Vec<(String, String)> {
        let name = &snapshot.interface.name;
        match self {
            Self::WgQuick => vec![(format!("{name}.conf"), wg_quick(snapshot))],
            Self::Systemd => vec![
                (format!("{name}.netdev"), netdev(snapshot)),
                (format!("{name}.network"), network(&snapshot.interface)),
            ],
        }
    }
}

fn join<T: Display>(items: &[T], sep: &str) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(sep)
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

pub fn wg_quick(snapshot: &InterfaceSnapshot) -> String {
    let iface = &snapshot.interface;
    let mut config = String::new();
    writeln!(config, "[Interface]").unwrap();
    writeln!(config, "ListenPort={}", iface.listen_port).unwrap();
    writeln!(config, "PrivateKey={}", iface.private_key).unwrap();
    writeln!(config, "MTU={}", iface.mtu).unwrap();
    writeln!(config, "Address={}", join(&iface.addresses(), ",")).unwrap();
    writeln!(config).unwrap();

    for client in &snapshot.clients {
        writeln!(config, "# Client: {}", client.alias).unwrap();
        writeln!(config, "[Peer]").unwrap();
        writeln!(config, "AllowedIPs={}", join(&client.host_networks(), ",")).unwrap();
        writeln!(config, "PublicKey={}", client.public_key).unwrap();
        writeln!(config, "PersistentKeepalive={}", iface.persistent_keepalive).unwrap();
        if let Some(ref psk) = client.preshared_key {
            writeln!(config, "PresharedKey={psk}").unwrap();
        }
        writeln!(config).unwrap();
    }

    config
}

pub fn netdev(snapshot: &InterfaceSnapshot) -> String {
    let iface = &snapshot.interface;
    let mut config = String::new();
    writeln!(config, "[NetDev]").unwrap();
    writeln!(config, "Kind=wireguard").unwrap();
    writeln!(config, "Name={}", iface.name).unwrap();
    writeln!(config, "MTUBytes={}", iface.mtu).unwrap();
    writeln!(config).unwrap();

    writeln!(config, "[WireGuard]").unwrap();
    writeln!(config, "ListenPort={}", iface.listen_port).unwrap();
    writeln!(config, "PrivateKey={}", iface.private_key).unwrap();
    writeln!(config).unwrap();

    for client in &snapshot.clients {
        writeln!(config, "# Client: {}", client.alias).unwrap();
        writeln!(config, "[WireGuardPeer]").unwrap();
        writeln!(config, "AllowedIPs={}", join(&client.host_networks(), ",")).unwrap();
        writeln!(config, "PublicKey={}", client.public_key).unwrap();
        if let Some(ref psk) = client.preshared_key {
            writeln!(config, "PresharedKey={psk}").unwrap();
        }
        writeln!(config, "PersistentKeepalive={}", iface.persistent_keepalive).unwrap();
        writeln!(config).unwrap();
    }

    config
}

pub fn network(iface: &Interface) -> String {
    let mut config = String::new();
    writeln!(config, "[Match]").unwrap();
    writeln!(config, "Name={}", iface.name).unwrap();
    writeln!(config).unwrap();

    writeln!(config, "[Link]").unwrap();
    writeln!(config, "ActivationPolicy=always-up").unwrap();
    writeln!(config, "RequiredForOnline=no").unwrap();
    writeln!(config).unwrap();

    writeln!(config, "[Network]").unwrap();
    for address in iface.addresses() {
        writeln!(config, "Address={address}").unwrap();
    }
    writeln!(config).unwrap();

    config
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// The wg-quick file a client imports, as printed by `client add`.
pub fn client_config(iface: &Interface, client: &Client, private_key: &str) -> String {
    let mut config = String::new();
    writeln!(config, "[Interface]").unwrap();
    writeln!(config, "Address = {}", join(&client.addresses(), ", ")).unwrap();
    writeln!(config, "PrivateKey = {private_key}").unwrap();
    writeln!(config, "DNS = {}", join(&iface.dns, ",")).unwrap();
    writeln!(config, "MTU = {}", iface.mtu).unwrap();
    writeln!(config).unwrap();

    writeln!(config, "[Peer]").unwrap();
    if let Some(ref psk) = client.preshared_key {
        writeln!(config, "PresharedKey = {psk}").unwrap();
    }
    writeln!(config, "PublicKey = {}", iface.public_key).unwrap();
    writeln!(config, "AllowedIPs = {}", join(&iface.allowed_ips, ", ")).unwrap();
    writeln!(config, "Endpoint = {}", iface.endpoint).unwrap();
    writeln!(config, "PersistentKeepalive = {}", iface.persistent_keepalive).unwrap();
    writeln!(config).unwrap();

    config
}

/// Render `text` as a QR code drawn with unicode half blocks, dark modules
/// printed as spaces so it scans on a dark terminal.
pub fn qr_code(text: &str) -> Result<String, RenderError> {
    let code = QrCode::new(text.as_bytes()).map_err(|e| RenderError::Qr(e.to_string()))?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Write every interface's files for `target` into `dir`.
///
/// The directory is created when missing. No interfaces means no files.
#[tracing::instrument(skip(snapshots), fields(interfaces = snapshots.len()))]
pub async fn write_all(
    target: Target,
    dir: &Path,
    snapshots: &[InterfaceSnapshot],
) -> Result<Vec<PathBuf>, RenderError> {
    info!(dir = %dir.display(), ?target, "rendering configuration");

    let mut written = Vec::new();
    for snapshot in snapshots {
        for (file_name, content) in target.files(snapshot) {
            let path = dir.join(file_name);
            write_file(&path, &content).await?;
            info!(interface = %snapshot.interface.name, path = %path.display(), "configuration written");
            written.push(path);
        }
    }
    Ok(written)
}

async fn write_file(path: &Path, content: &str) -> Result<(), RenderError> {
    let io_err = |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options.open(path).await.map_err(io_err)?;

    // `mode` only applies to new files, and the umask may narrow it further
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(FILE_MODE))
            .await
            .map_err(io_err)?;
    }

    file.write_all(content.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn interface(ipv4: Option<&str>, ipv6: Option<&str>) -> Interface {
        Interface {
            name: "wg0".to_string(),
            ipv4: ipv4.map(|s| s.parse().unwrap()),
            ipv6: ipv6.map(|s| s.parse().unwrap()),
            private_key: "server-private".to_string(),
            public_key: "server-public".to_string(),
            mtu: 1420,
            listen_port: 51820,
            endpoint: "vpn.example.com:51820".to_string(),
            dns: vec!["1.1.1.1".parse().unwrap(), "8.8.8.8".parse().unwrap()],
            allowed_ips: vec!["0.0.0.0/0".parse().unwrap(), "2000::/3".parse().unwrap()],
            persistent_keepalive: 15,
            address_shift: 1,
            created_at: wirewright_types::now(),
        }
    }

    fn snapshot(aliases: &[(&str, bool)]) -> InterfaceSnapshot {
        let mut iface = interface(Some("10.0.0.1/24"), Some("fd00::1/64"));
        let clients = aliases
            .iter()
            .map(|(alias, psk)| {
                let psk = psk.then(|| format!("{alias}-psk"));
                iface.issue_client(alias, format!("{alias}-public"), psk).unwrap()
            })
            .collect();
        InterfaceSnapshot {
            interface: iface,
            clients,
        }
    }

    #[test]
    fn wg_quick_without_clients() {
        let conf = wg_quick(&snapshot(&[]));
        assert_eq!(
            conf,
            "[Interface]\n\
             ListenPort=51820\n\
             PrivateKey=server-private\n\
             MTU=1420\n\
             Address=10.0.0.1/24,fd00::1/64\n\
             \n"
        );
    }

    #[test]
    fn wg_quick_peers_in_order() {
        let conf = wg_quick(&snapshot(&[("alice", false), ("bob", true)]));
        let alice = conf.find("# Client: alice").unwrap();
        let bob = conf.find("# Client: bob").unwrap();
        assert!(alice < bob);
        assert_eq!(conf.matches("[Peer]").count(), 2);
        assert!(conf.contains(
            "# Client: alice\n\
             [Peer]\n\
             AllowedIPs=10.0.0.2/32,fd00::2/128\n\
             PublicKey=alice-public\n\
             PersistentKeepalive=15\n\
             \n"
        ));
        assert!(conf.contains("PersistentKeepalive=15\nPresharedKey=bob-psk\n"));
    }

    #[test]
    fn netdev_peer_block() {
        let conf = netdev(&snapshot(&[("bob", true)]));
        assert!(conf.starts_with("[NetDev]\nKind=wireguard\nName=wg0\nMTUBytes=1420\n\n"));
        assert!(conf.contains("[WireGuard]\nListenPort=51820\nPrivateKey=server-private\n\n"));
        assert!(conf.contains(
            "# Client: bob\n\
             [WireGuardPeer]\n\
             AllowedIPs=10.0.0.2/32,fd00::2/128\n\
             PublicKey=bob-public\n\
             PresharedKey=bob-psk\n\
             PersistentKeepalive=15\n"
        ));
    }

    #[test]
    fn netdev_without_clients_has_no_peers() {
        assert!(!netdev(&snapshot(&[])).contains("[WireGuardPeer]"));
    }

    #[test_case(Some("10.0.0.1/24"), Some("fd00::1/64"), &["10.0.0.1/24", "fd00::1/64"] ; "dual stack")]
    #[test_case(None, Some("fd00::1/64"), &["fd00::1/64"] ; "ipv6 only")]
    #[test_case(None, None, &[] ; "no addresses")]
    fn test_network_addresses(ipv4: Option<&str>, ipv6: Option<&str>, expected: &[&str]) {
        let conf = network(&interface(ipv4, ipv6));
        assert!(conf.starts_with(
            "[Match]\nName=wg0\n\n[Link]\nActivationPolicy=always-up\nRequiredForOnline=no\n\n[Network]\n"
        ));
        let addresses: Vec<&str> = conf
            .lines()
            .filter_map(|line| line.strip_prefix("Address="))
            .collect();
        assert_eq!(addresses, expected);
    }

    #[test]
    fn client_config_sections() {
        let snap = snapshot(&[("alice", true)]);
        let conf = client_config(&snap.interface, &snap.clients[0], "client-private");
        assert_eq!(
            conf,
            "[Interface]\n\
             Address = 10.0.0.2, fd00::2\n\
             PrivateKey = client-private\n\
             DNS = 1.1.1.1,8.8.8.8\n\
             MTU = 1420\n\
             \n\
             [Peer]\n\
             PresharedKey = alice-psk\n\
             PublicKey = server-public\n\
             AllowedIPs = 0.0.0.0/0, 2000::/3\n\
             Endpoint = vpn.example.com:51820\n\
             PersistentKeepalive = 15\n\
             \n"
        );
    }

    #[test]
    fn qr_code_renders_blocks() {
        let qr = qr_code("[Interface]\nPrivateKey = x\n").unwrap();
        assert!(qr.lines().count() > 10);
    }

    #[test]
    fn target_file_names() {
        let snap = snapshot(&[]);
        let names: Vec<String> = Target::Systemd.files(&snap).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["wg0.netdev", "wg0.network"]);
        assert_eq!(Target::WgQuick.files(&snap)[0].0, "wg0.conf");
    }
}
