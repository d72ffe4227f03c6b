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

use crate::config::ConfigError;
use crate::db::StoreError;
use crate::output::OutputError;
use crate::render::RenderError;

/// `EX_TEMPFAIL` from sysexits.h.
pub const EXIT_RETRY: u8 = 75;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to format output: {0}")]
    Output(#[from] OutputError),

    #[error("failed to write output: {0}")]
    Stdout(#[from] std::io::Error),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Store(err) if err.is_retryable() => EXIT_RETRY,
            _ => 1,
        }
    }
}
