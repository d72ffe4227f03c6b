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

pub mod records;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::ConnectOptions;
use sqlx::migrate::MigrateError;
use tracing::debug;

pub use records::{InterfaceSnapshot, IssuedClient, RecordStore, StoreError};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the database file at `path`.
///
/// A connection waiting on another invocation's write lock gives up after
/// `busy_timeout` and reports [`StoreError::Busy`].
#[tracing::instrument]
pub async fn connect(path: &Path, busy_timeout: Duration) -> Result<SqliteConnection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
    }

    let conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout)
        .connect()
        .await?;

    debug!("database connection opened");
    Ok(conn)
}

/// Bring the schema up to date.
///
/// Two invocations starting on a fresh file both see the schema as missing.
/// The one that loses the write lock either times out (Busy) or, once the
/// winner commits, fails re-applying a version that is now recorded. That
/// second case is settled by running the migrator again, which then finds
/// nothing left to apply.
pub async fn migrate(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let migrator = sqlx::migrate!("./migrations");
    match migrator.run(&mut *conn).await.map_err(StoreError::from) {
        Ok(()) => {}
        Err(StoreError::Migrate(err)) => {
            debug!(%err, "migration raced another invocation, checking again");
            migrator.run(&mut *conn).await?;
        }
        Err(err) => return Err(err),
    }
    debug!("database migrations applied");
    Ok(())
}

/// Lock failure inside a migration, whichever step it hit.
pub(crate) fn is_busy_migration(err: &MigrateError) -> bool {
    match err {
        MigrateError::Execute(e) | MigrateError::ExecuteMigration(e, _) => is_busy(e),
        _ => false,
    }
}

/// Take the database write lock up front, before any read, so that
/// concurrent invocations are serialized.
pub async fn begin_immediate(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::raw_sql("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    debug!("write transaction started");
    Ok(())
}

/// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}
