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

//! wirewright: keeps WireGuard interface and client records in SQLite and
//! renders them as wg-quick or systemd-networkd configuration.
//!
//! Every invocation runs inside one write transaction. [`run`] commits it
//! when the command succeeds and rolls it back otherwise.

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod output;
pub mod render;

use std::io::Write;

use tracing::{debug, warn};

use crate::cli::Cli;
use crate::commands::Report;
use crate::config::Settings;
use crate::db::RecordStore;
use crate::error::AppError;
use crate::output::OutputFormat;

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let settings = Settings::resolve(cli.db_path, cli.config).await?;
    debug!(?settings, "resolved settings");

    let mut store = RecordStore::open(&settings.db_path, settings.busy_timeout).await?;
    let report = match commands::execute(&mut store, cli.command, &settings).await {
        Ok(report) => {
            store.commit().await?;
            report
        }
        Err(err) => {
            if let Err(rollback) = store.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            return Err(err);
        }
    };

    let mut stdout = std::io::stdout().lock();
    write_report(&mut stdout, &report, cli.output_format)?;
    stdout.flush()?;
    Ok(())
}

pub fn write_report(out: &mut impl Write, report: &Report, format: OutputFormat) -> Result<(), AppError> {
    match report {
        Report::Interfaces(rows) => out.write_all(output::format_list(rows, format)?.as_bytes())?,
        Report::Clients(rows) => out.write_all(output::format_list(rows, format)?.as_bytes())?,
        Report::ClientConfig { qr: Some(qr), .. } => writeln!(out, "{qr}")?,
        Report::ClientConfig { config, qr: None } => out.write_all(config.as_bytes())?,
        Report::Rendered(_) | Report::Done => {}
    }
    Ok(())
}
