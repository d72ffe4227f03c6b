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

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDateTime;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, info, warn};
use wirewright_types::pool::{self, Family, PoolError};
use wirewright_types::{
    Client, Interface, NameError, TIMESTAMP_FORMAT, normalize_networks, validate_alias,
    validate_interface_name,
};

use crate::keys;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct InterfaceRow {
    name: String,
    created_at: String,
    ipv4: Option<String>,
    ipv6: Option<String>,
    address_shift: i64,
    private_key: String,
    public_key: String,
    mtu: i64,
    listen_port: i64,
    endpoint: String,
    dns: String,
    allowed_ips: String,
    persistent_keepalive: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    interface: String,
    alias: String,
    public_key: String,
    preshared_key: Option<String>,
    ipv4: Option<String>,
    ipv6: Option<String>,
    created_at: String,
}

/// An interface together with its clients in creation order.
#[derive(Debug, Clone)]
pub struct InterfaceSnapshot {
    pub interface: Interface,
    pub clients: Vec<Client>,
}

/// Result of [`RecordStore::create_client`]. The private key is never stored.
#[derive(Debug)]
pub struct IssuedClient {
    pub client: Client,
    pub private_key: String,
    pub interface: Interface,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("database is locked by another invocation, try again")]
    Busy,

    #[error("database migration failed: {0}")]
    Migrate(sqlx::migrate::MigrateError),

    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("client '{alias}' not found in interface '{interface}'")]
    ClientNotFound { alias: String, interface: String },

    #[error("client '{alias}' already exists for interface '{interface}'")]
    DuplicateClient { alias: String, interface: String },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{family} subnet {network} overlaps with interface '{other}' ({other_network})")]
    SubnetConflict {
        family: Family,
        network: String,
        other: String,
        other_network: String,
    },

    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("stored {column} value {value:?} is invalid")]
    Corrupt { column: &'static str, value: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if super::is_busy(&err) {
            Self::Busy
        } else {
            Self::Database(err)
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        if super::is_busy_migration(&err) {
            Self::Busy
        } else {
            Self::Migrate(err)
        }
    }
}

impl StoreError {
    /// The operation may succeed if retried once the other invocation is done.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

fn parse_column<T: FromStr>(column: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_optional<T: FromStr>(column: &'static str, value: Option<&str>) -> Result<Option<T>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| parse_column(column, v))
        .transpose()
}

fn parse_list<T: FromStr>(column: &'static str, value: &str) -> Result<Vec<T>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split(',').map(|v| parse_column(column, v.trim())).collect()
}

fn parse_int<T: TryFrom<i64>>(column: &'static str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn join_list<T: Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

impl TryFrom<InterfaceRow> for Interface {
    type Error = StoreError;

    fn try_from(row: InterfaceRow) -> Result<Self> {
        Ok(Interface {
            ipv4: parse_optional("interfaces.ipv4", row.ipv4.as_deref())?,
            ipv6: parse_optional("interfaces.ipv6", row.ipv6.as_deref())?,
            address_shift: parse_int("interfaces.address_shift", row.address_shift)?,
            mtu: parse_int("interfaces.mtu", row.mtu)?,
            listen_port: parse_int("interfaces.listen_port", row.listen_port)?,
            dns: parse_list("interfaces.dns", &row.dns)?,
            allowed_ips: parse_list("interfaces.allowed_ips", &row.allowed_ips)?,
            persistent_keepalive: parse_int(
                "interfaces.persistent_keepalive",
                row.persistent_keepalive,
            )?,
            created_at: parse_timestamp("interfaces.created_at", &row.created_at)?,
            name: row.name,
            private_key: row.private_key,
            public_key: row.public_key,
            endpoint: row.endpoint,
        })
    }
}

impl TryFrom<ClientRow> for Client {
    type Error = StoreError;

    fn try_from(row: ClientRow) -> Result<Self> {
        Ok(Client {
            ipv4: parse_optional("clients.ipv4", row.ipv4.as_deref())?,
            ipv6: parse_optional("clients.ipv6", row.ipv6.as_deref())?,
            created_at: parse_timestamp("clients.created_at", &row.created_at)?,
            interface: row.interface,
            alias: row.alias,
            public_key: row.public_key,
            preshared_key: row.preshared_key,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Durable interface and client records, bound to one write transaction.
///
/// The transaction is opened by [`RecordStore::open`] and ends with
/// [`RecordStore::commit`] or [`RecordStore::rollback`]. A store dropped
/// without either closes its connection, which discards every change.
#[derive(Debug)]
pub struct RecordStore {
    conn: SqliteConnection,
}

impl RecordStore {
    /// Connect, migrate, and start the invocation's write transaction.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let mut conn = super::connect(path, busy_timeout).await?;
        super::migrate(&mut conn).await?;
        super::begin_immediate(&mut conn).await?;
        Ok(Self { conn })
    }

    #[tracing::instrument(skip(self))]
    pub async fn commit(mut self) -> Result<()> {
        sqlx::raw_sql("COMMIT").execute(&mut self.conn).await?;
        self.conn.close().await?;
        debug!("transaction committed");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn rollback(mut self) -> Result<()> {
        sqlx::raw_sql("ROLLBACK").execute(&mut self.conn).await?;
        self.conn.close().await?;
        debug!("transaction rolled back");
        Ok(())
    }

    // -- Interfaces ----------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn find_interface(&mut self, name: &str) -> Result<Option<Interface>> {
        sqlx::query_as::<_, InterfaceRow>("SELECT * FROM interfaces WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut self.conn)
            .await?
            .map(Interface::try_from)
            .transpose()
    }

    pub async fn load_interface(&mut self, name: &str) -> Result<Interface> {
        self.find_interface(name)
            .await?
            .ok_or_else(|| StoreError::InterfaceNotFound(name.to_string()))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_interfaces(&mut self) -> Result<Vec<Interface>> {
        sqlx::query_as::<_, InterfaceRow>("SELECT * FROM interfaces ORDER BY name")
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .map(Interface::try_from)
            .collect()
    }

    /// Insert or fully replace the interface row keyed by name.
    ///
    /// Every column is written as given, `address_shift` included, so callers
    /// updating an existing interface must start from the loaded record.
    /// Nothing is written unless the interface passes validation.
    #[tracing::instrument(skip(self, iface), fields(interface = %iface.name))]
    pub async fn save_interface(&mut self, iface: &Interface) -> Result<()> {
        validate_interface_name(&iface.name)?;
        iface.check_address_space()?;
        self.check_subnet_conflicts(iface).await?;

        let allowed_ips = normalize_networks(iface.allowed_ips.clone());

        sqlx::query(
            "INSERT INTO interfaces (name, created_at, ipv4, ipv6, address_shift, private_key,
                                     public_key, mtu, listen_port, endpoint, dns, allowed_ips,
                                     persistent_keepalive)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (name) DO UPDATE
             SET created_at = excluded.created_at,
                 ipv4 = excluded.ipv4,
                 ipv6 = excluded.ipv6,
                 address_shift = excluded.address_shift,
                 private_key = excluded.private_key,
                 public_key = excluded.public_key,
                 mtu = excluded.mtu,
                 listen_port = excluded.listen_port,
                 endpoint = excluded.endpoint,
                 dns = excluded.dns,
                 allowed_ips = excluded.allowed_ips,
                 persistent_keepalive = excluded.persistent_keepalive",
        )
        .bind(&iface.name)
        .bind(format_timestamp(&iface.created_at))
        .bind(iface.ipv4.map(|n| n.to_string()))
        .bind(iface.ipv6.map(|n| n.to_string()))
        .bind(i64::from(iface.address_shift))
        .bind(&iface.private_key)
        .bind(&iface.public_key)
        .bind(i64::from(iface.mtu))
        .bind(i64::from(iface.listen_port))
        .bind(&iface.endpoint)
        .bind(join_list(&iface.dns))
        .bind(join_list(&allowed_ips))
        .bind(i64::from(iface.persistent_keepalive))
        .execute(&mut self.conn)
        .await?;

        debug!(address_shift = iface.address_shift, "interface saved");
        Ok(())
    }

    /// Reject `iface` if one of its subnets shares addresses with the same
    /// family's subnet on any other stored interface.
    async fn check_subnet_conflicts(&mut self, iface: &Interface) -> Result<()> {
        let others: Vec<Interface> =
            sqlx::query_as::<_, InterfaceRow>("SELECT * FROM interfaces WHERE name != ?")
                .bind(&iface.name)
                .fetch_all(&mut self.conn)
                .await?
                .into_iter()
                .map(Interface::try_from)
                .collect::<Result<_>>()?;

        for other in &others {
            let Some(family) = iface.overlapping_family(other) else {
                continue;
            };
            let (network, other_network) = match family {
                Family::V4 => (
                    iface.ipv4.map(pool::subnet_v4),
                    other.ipv4.map(pool::subnet_v4),
                ),
                Family::V6 => (
                    iface.ipv6.map(pool::subnet_v6),
                    other.ipv6.map(pool::subnet_v6),
                ),
            };
            warn!(interface = %iface.name, other = %other.name, %family, "subnet conflict");
            return Err(StoreError::SubnetConflict {
                family,
                network: network.unwrap_or_default(),
                other: other.name.clone(),
                other_network: other_network.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Delete the interface and, first, every client it owns.
    ///
    /// Removing a name that is not stored is a no-op; callers that need
    /// NotFound check with [`RecordStore::load_interface`] first.
    #[tracing::instrument(skip(self))]
    pub async fn remove_interface(&mut self, name: &str) -> Result<()> {
        let clients = sqlx::query("DELETE FROM clients WHERE interface = ?")
            .bind(name)
            .execute(&mut self.conn)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM interfaces WHERE name = ?")
            .bind(name)
            .execute(&mut self.conn)
            .await?;

        info!(interface = name, clients, "interface removed");
        Ok(())
    }

    // -- Clients -------------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn find_client(&mut self, alias: &str, interface: &str) -> Result<Option<Client>> {
        sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE alias = ? AND interface = ?")
            .bind(alias)
            .bind(interface)
            .fetch_optional(&mut self.conn)
            .await?
            .map(Client::try_from)
            .transpose()
    }

    pub async fn load_client(&mut self, alias: &str, interface: &str) -> Result<Client> {
        self.find_client(alias, interface)
            .await?
            .ok_or_else(|| StoreError::ClientNotFound {
                alias: alias.to_string(),
                interface: interface.to_string(),
            })
    }

    /// Insert or replace the client row keyed by (interface, alias). A
    /// replaced row keeps its id, and with it its place in creation order.
    #[tracing::instrument(skip(self, client), fields(interface = %client.interface, alias = %client.alias))]
    pub async fn save_client(&mut self, client: &Client) -> Result<()> {
        validate_alias(&client.alias)?;

        sqlx::query(
            "INSERT INTO clients (interface, alias, public_key, preshared_key, ipv4, ipv6, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (interface, alias) DO UPDATE
             SET created_at = excluded.created_at,
                 public_key = excluded.public_key,
                 preshared_key = excluded.preshared_key,
                 ipv4 = excluded.ipv4,
                 ipv6 = excluded.ipv6",
        )
        .bind(&client.interface)
        .bind(&client.alias)
        .bind(&client.public_key)
        .bind(client.preshared_key.as_deref())
        .bind(client.ipv4.map(|a| a.to_string()))
        .bind(client.ipv6.map(|a| a.to_string()))
        .bind(format_timestamp(&client.created_at))
        .execute(&mut self.conn)
        .await?;

        debug!("client saved");
        Ok(())
    }

    /// Clients of `interface` in creation order.
    #[tracing::instrument(skip(self))]
    pub async fn list_clients(&mut self, interface: &str) -> Result<Vec<Client>> {
        sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE interface = ? ORDER BY id")
            .bind(interface)
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .map(Client::try_from)
            .collect()
    }

    /// Delete one client. Returns whether a row existed.
    #[tracing::instrument(skip(self))]
    pub async fn remove_client(&mut self, alias: &str, interface: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM clients WHERE interface = ? AND alias = ?")
            .bind(interface)
            .bind(alias)
            .execute(&mut self.conn)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    /// Create a client on `interface_name`, allocating its addresses from the
    /// interface's pool and generating its keys.
    ///
    /// An existing alias is an error unless `overwrite` is set, in which case
    /// the client is re-issued with new keys and new addresses.
    #[tracing::instrument(skip(self))]
    pub async fn create_client(
        &mut self,
        interface_name: &str,
        alias: &str,
        preshared: bool,
        overwrite: bool,
    ) -> Result<IssuedClient> {
        validate_alias(alias)?;
        let mut interface = self.load_interface(interface_name).await?;

        if self.find_client(alias, interface_name).await?.is_some() {
            if !overwrite {
                return Err(StoreError::DuplicateClient {
                    alias: alias.to_string(),
                    interface: interface_name.to_string(),
                });
            }
            warn!(alias, interface = interface_name, "overwriting existing client");
        }

        let preshared_key = preshared.then(keys::generate_preshared);
        let keypair = keys::generate_keypair();
        let client = interface.issue_client(alias, keypair.public_key, preshared_key)?;

        self.save_interface(&interface).await?;
        self.save_client(&client).await?;

        info!(
            alias,
            interface = interface_name,
            ipv4 = ?client.ipv4,
            ipv6 = ?client.ipv6,
            "client created"
        );
        Ok(IssuedClient {
            client,
            private_key: keypair.private_key,
            interface,
        })
    }

    // -- Snapshots -----------------------------------------------------------

    /// Every interface in name order, each with its clients.
    #[tracing::instrument(skip(self))]
    pub async fn load_snapshots(&mut self) -> Result<Vec<InterfaceSnapshot>> {
        let interfaces = self.list_interfaces().await?;
        let mut snapshots = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            let clients = self.list_clients(&interface.name).await?;
            snapshots.push(InterfaceSnapshot { interface, clients });
        }
        Ok(snapshots)
    }
}
