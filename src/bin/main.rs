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

use clap::Parser;
use stock_ledger::config::{self, Config};
use stock_ledger::server::{self, AppState};
use stock_ledger::{InventoryService, Item, MemoryLedger, PostgresLedger, StockLedger, telemetry};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Before the subscriber exists, so RUST_LOG may come from the file
    let env_file = config::load_env_file(Path::new(config::ENV_FILE));
    telemetry::init();
    match env_file {
        Ok(true) => debug!(path = config::ENV_FILE, "loaded environment file"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "ignoring unreadable environment file"),
    }

    let config = Config::parse();

    // Any failure before the listener is bound is fatal
    let ledger = match open_ledger(&config).await {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, "failed to open ledger");
            process::exit(1);
        }
    };

    if let Err(e) = ledger.create_schema_if_absent().await {
        error!(error = %e, "failed to create schema");
        process::exit(1);
    }

    let inventory =
        InventoryService::new(ledger).with_purchase_timeout(config.purchase_timeout());

    let listener = match TcpListener::bind(config.listen_addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_addr(), error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %config.listen_addr(), "inventory service listening");

    if let Err(e) = server::serve(listener, AppState::new(inventory)).await {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

async fn open_ledger(config: &Config) -> Result<Arc<dyn StockLedger>, String> {
    if config.in_memory {
        let ledger = match &config.seed {
            Some(path) => MemoryLedger::with_items(read_seed(path)?).map_err(|e| e.to_string())?,
            None => MemoryLedger::new(),
        };
        info!(items = ledger.len(), "using in-memory ledger");
        return Ok(Arc::new(ledger));
    }

    let dsn = config
        .dsn
        .as_deref()
        .ok_or_else(|| "DSN is not set".to_string())?;
    let ledger = PostgresLedger::connect(dsn, config.max_connections, config.acquire_timeout())
        .await
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(ledger))
}

fn read_seed(path: &Path) -> Result<Vec<Item>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Error opening seed file '{}': {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| format!("Error parsing seed file '{}': {}", path.display(), e))
}
