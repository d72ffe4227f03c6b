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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::render::Target;

const APP_DIR: &str = "wirewright";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_secs: Option<u64>,

    #[serde(default)]
    pub render: RenderToml,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wgquick_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no user data directory; pass --db-path and --config")]
    NoDataDir,
}

/// `<data_dir>/wirewright`, e.g. `~/.local/share/wirewright` on Linux.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoDataDir)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_data_dir()?.join("config.toml"))
}

pub async fn load(path: &Path) -> Result<ConfigToml, ConfigError> {
    debug!(path = %path.display(), "loading config");

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let config: ConfigToml = toml::from_str(&contents)?;
            info!(path = %path.display(), "loaded config");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, using defaults");
            Ok(ConfigToml::default())
        }
        Err(e) => Err(ConfigError::Read(e)),
    }
}

pub async fn save(path: &Path, config: &ConfigToml) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;
    tokio::fs::write(path, contents).await?;
    info!(path = %path.display(), "saved config");
    Ok(())
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
    pub wgquick_dir: PathBuf,
    pub systemd_dir: PathBuf,
}

impl Settings {
    /// Merge the command line (which already carries environment overrides)
    /// over the config file at `config_path`.
    ///
    /// When neither names a database, the default location is used and
    /// recorded in the config file so later runs find the same database.
    pub async fn resolve(
        db_path: Option<PathBuf>,
        config_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut file = load(&config_path).await?;

        let db_path = match db_path.or_else(|| file.db_path.clone()) {
            Some(path) => path,
            None => {
                let path = default_data_dir()?.join("database.sqlite3");
                file.db_path = Some(path.clone());
                save(&config_path, &file).await?;
                info!(db_path = %path.display(), "using default database location");
                path
            }
        };

        Ok(Self::from_parts(db_path, &file))
    }

    pub fn from_parts(db_path: PathBuf, file: &ConfigToml) -> Self {
        Self {
            db_path,
            busy_timeout: file
                .busy_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BUSY_TIMEOUT),
            wgquick_dir: file
                .render
                .wgquick_dir
                .clone()
                .unwrap_or_else(|| Target::WgQuick.default_dir().to_path_buf()),
            systemd_dir: file
                .render
                .systemd_dir
                .clone()
                .unwrap_or_else(|| Target::Systemd.default_dir().to_path_buf()),
        }
    }

    /// Output directory for `target` unless overridden on the command line.
    pub fn render_dir(&self, target: Target) -> &Path {
        match target {
            Target::WgQuick => &self.wgquick_dir,
            Target::Systemd => &self.systemd_dir,
        }
    }
}
