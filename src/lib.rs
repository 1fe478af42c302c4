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

//! # Stock Ledger
//!
//! This library provides an inventory service that answers item lookups and
//! performs quantity-decrementing purchases against a transactional stock
//! ledger, without ever driving stock negative or losing an update under
//! concurrent load.
//!
//! ## Core Components
//!
//! - [`StockLedger`]: Durable item store with row locks and a non-negative quantity constraint
//! - [`MemoryLedger`]: In-process ledger
//! - [`PostgresLedger`]: PostgreSQL ledger using `SELECT … FOR UPDATE`
//! - [`InventoryService`]: `get_item`, `list_all` and `purchase`
//! - [`InventoryError`]: Caller-visible failure kinds
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use stock_ledger::{InventoryService, Item, ItemId, MemoryLedger, PurchaseRequest};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ledger = MemoryLedger::with_items([Item::new(ItemId(1), "Widget", 10)]).unwrap();
//! let inventory = InventoryService::new(Arc::new(ledger));
//!
//! // Purchase three widgets
//! let item = inventory.purchase(PurchaseRequest::new(ItemId(1), 3)).await.unwrap();
//! assert_eq!(item.quantity, 7);
//! # });
//! ```
//!
//! ## Thread Safety
//!
//! Purchases of the same item are serialized by the ledger's row lock, never
//! by in-process state, so the guarantee holds across processes sharing one
//! PostgreSQL database. Purchases of different items proceed in parallel and
//! reads never wait on row locks.

mod base;
pub mod config;
pub mod error;
mod item;
pub mod ledger;
mod memory;
mod postgres;
pub mod server;
mod service;
pub mod telemetry;

pub use base::ItemId;
pub use error::{InventoryError, LedgerError};
pub use item::{Item, PurchaseRequest};
pub use ledger::{StockLedger, UnitOfWork};
pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;
pub use service::InventoryService;
