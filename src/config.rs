// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Process configuration, resolved once at startup.

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment file read at startup, relative to the working directory.
pub const ENV_FILE: &str = ".env";

/// Exports the variables in `path` into the process environment without
/// overriding ones already set. Returns `false` when the file is absent.
///
/// Call before [`crate::telemetry::init`] so `RUST_LOG` from the file
/// takes effect.
pub fn load_env_file(path: &Path) -> Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(err) if err.not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "stock-ledger")]
#[command(about = "Inventory service with concurrency-safe stock purchases", long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// PostgreSQL connection string
    #[arg(long, env = "DSN", required_unless_present = "in_memory")]
    pub dsn: Option<String>,

    /// Upper bound on pooled ledger connections
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,

    /// Milliseconds a purchase may spend waiting for and holding its row lock
    #[arg(long, env = "PURCHASE_TIMEOUT_MS", default_value_t = 5000)]
    pub purchase_timeout_ms: u64,

    /// Serve from an in-process ledger instead of PostgreSQL
    #[arg(long)]
    pub in_memory: bool,

    /// JSON array of items to provision into the in-process ledger
    ///
    /// Example: [{"ItemID": 1, "Name": "Widget", "Quantity": 10}]
    #[arg(long, value_name = "FILE", requires = "in_memory")]
    pub seed: Option<PathBuf>,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn purchase_timeout(&self) -> Duration {
        Duration::from_millis(self.purchase_timeout_ms)
    }
}
