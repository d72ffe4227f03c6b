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

use clap::ValueEnum;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use wirewright_types::report::{ClientSummary, InterfaceSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Pretty-printed JSON array
    Json,
    /// Comma-separated values with a header row
    Csv,
    /// Tab-separated values with a header row
    Tsv,
}

/// Rows that can be printed as a table or delimited text.
pub trait TableDisplay {
    const TITLE: &'static str;

    /// Column names, matching the serialized field names.
    fn headers() -> &'static [&'static str];

    fn row(&self) -> Vec<String>;
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

impl TableDisplay for InterfaceSummary {
    const TITLE: &'static str = "WireGuard Interfaces";

    fn headers() -> &'static [&'static str] {
        &[
            "interface",
            "endpoint",
            "public_key",
            "ipv4",
            "ipv6",
            "mtu",
            "listen_port",
            "dns",
            "allowed_ips",
            "address_shift",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.interface.clone(),
            self.endpoint.clone(),
            self.public_key.clone(),
            opt(&self.ipv4),
            opt(&self.ipv6),
            self.mtu.to_string(),
            self.listen_port.to_string(),
            self.dns.join(","),
            self.allowed_ips.join(","),
            self.address_shift.to_string(),
        ]
    }
}

impl TableDisplay for ClientSummary {
    const TITLE: &'static str = "WireGuard Clients";

    fn headers() -> &'static [&'static str] {
        &["interface", "client", "ipv4", "ipv6", "public_key"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.interface.clone(),
            self.client.clone(),
            opt(&self.ipv4),
            opt(&self.ipv6),
            self.public_key.clone(),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Render `items` in `format`. The result ends with a newline unless empty.
pub fn format_list<T: Serialize + TableDisplay>(
    items: &[T],
    format: OutputFormat,
) -> Result<String, OutputError> {
    Ok(match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers().iter().map(|h| h.replace('_', " ")));
            for item in items {
                table.add_row(item.row());
            }
            format!("{}\n{table}\n", T::TITLE)
        }
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(items)?),
        OutputFormat::Csv => delimited(items, b',')?,
        OutputFormat::Tsv => delimited(items, b'\t')?,
    })
}

/// Header row plus one record per item. Fields holding the delimiter, a quote
/// or a line break are quoted.
fn delimited<T: TableDisplay>(items: &[T], delimiter: u8) -> Result<String, csv::Error> {
    if items.is_empty() {
        return Ok(String::new());
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    writer.write_record(T::headers())?;
    for item in items {
        writer.write_record(item.row())?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
