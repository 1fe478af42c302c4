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

//! In-process stock ledger.
//!
//! Each row carries two things:
//!
//! - an exclusive row lock, owned by at most one unit-of-work at a time and
//!   released when that unit-of-work commits, rolls back or is dropped;
//! - the last committed record, behind a short-lived read/write lock.
//!
//! Decrements are staged inside the unit-of-work and only published on
//! commit, so readers observe either the pre- or post-purchase quantity.
//!
//! # Example
//!
//! ```
//! use stock_ledger::{Item, ItemId, MemoryLedger, StockLedger, UnitOfWork};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ledger = MemoryLedger::with_items([Item::new(ItemId(1), "Widget", 10)]).unwrap();
//!
//! let mut uow = ledger.begin().await.unwrap();
//! uow.lock_for_update(ItemId(1)).await.unwrap();
//! assert_eq!(uow.apply_decrement(ItemId(1), 3).await.unwrap(), 7);
//!
//! // Not visible until commit
//! assert_eq!(ledger.get(ItemId(1)).await.unwrap().quantity, 10);
//! uow.commit().await.unwrap();
//! assert_eq!(ledger.get(ItemId(1)).await.unwrap().quantity, 7);
//! # });
//! ```

use crate::base::ItemId;
use crate::error::LedgerError;
use crate::item::Item;
use crate::ledger::{StockLedger, UnitOfWork};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone)]
struct Record {
    name: String,
    quantity: i64,
}

impl Record {
    fn assert_invariants(&self) {
        debug_assert!(
            self.quantity >= 0,
            "Invariant violated: quantity went negative: {}",
            self.quantity
        );
    }
}

#[derive(Debug)]
struct Row {
    lock: Arc<Mutex<()>>,
    committed: RwLock<Record>,
}

impl Row {
    fn new(record: Record) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            committed: RwLock::new(record),
        }
    }

    fn snapshot(&self, item_id: ItemId) -> Item {
        let record = self.committed.read();
        Item {
            item_id,
            name: record.name.clone(),
            quantity: record.quantity,
        }
    }
}

type Rows = Arc<DashMap<ItemId, Arc<Row>>>;

/// Clones the row handle out of the map so no shard lock is held afterwards.
fn find_row(rows: &Rows, id: ItemId) -> Result<Arc<Row>, LedgerError> {
    rows.get(&id)
        .map(|row| Arc::clone(row.value()))
        .ok_or(LedgerError::NotFound)
}

/// Ledger held entirely in process memory.
///
/// Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: Rows,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger provisioned with `items`.
    ///
    /// # Errors
    ///
    /// Fails on the first item that [`insert_item`](Self::insert_item) rejects.
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        for item in items {
            ledger.insert_item(item)?;
        }
        Ok(ledger)
    }

    /// Provisions a new row.
    pub fn insert_item(&self, item: Item) -> Result<(), LedgerError> {
        if item.quantity < 0 {
            return Err(LedgerError::ConstraintViolation);
        }

        // Entry API makes the existence check and insert atomic
        match self.rows.entry(item.item_id) {
            Entry::Occupied(_) => Err(LedgerError::Unavailable(format!(
                "duplicate item {}",
                item.item_id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Row::new(Record {
                    name: item.name,
                    quantity: item.quantity,
                })));
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl StockLedger for MemoryLedger {
    async fn create_schema_if_absent(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn insert(&self, item: &Item) -> Result<(), LedgerError> {
        self.insert_item(item.clone())
    }

    async fn get(&self, id: ItemId) -> Result<Item, LedgerError> {
        find_row(&self.rows, id).map(|row| row.snapshot(id))
    }

    async fn list(&self) -> Result<Vec<Item>, LedgerError> {
        let mut items: Vec<Item> = self
            .rows
            .iter()
            .map(|entry| entry.value().snapshot(*entry.key()))
            .collect();
        items.sort_by_key(|item| item.item_id);
        Ok(items)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        Ok(Box::new(MemoryUnitOfWork {
            rows: Arc::clone(&self.rows),
            held: HashMap::new(),
        }))
    }
}

/// A row locked by a unit-of-work, with its uncommitted quantity.
struct HeldRow {
    row: Arc<Row>,
    staged: Option<i64>,
    _guard: OwnedMutexGuard<()>,
}

impl HeldRow {
    fn quantity(&self) -> i64 {
        self.staged
            .unwrap_or_else(|| self.row.committed.read().quantity)
    }

    fn view(&self, item_id: ItemId) -> Item {
        let mut item = self.row.snapshot(item_id);
        item.quantity = self.quantity();
        item
    }
}

struct MemoryUnitOfWork {
    rows: Rows,
    held: HashMap<ItemId, HeldRow>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_for_update(&mut self, id: ItemId) -> Result<Item, LedgerError> {
        if let Some(held) = self.held.get(&id) {
            return Ok(held.view(id));
        }

        let row = find_row(&self.rows, id)?;
        let guard = Arc::clone(&row.lock).lock_owned().await;
        let held = HeldRow {
            row,
            staged: None,
            _guard: guard,
        };
        let item = held.view(id);
        self.held.insert(id, held);
        Ok(item)
    }

    async fn apply_decrement(&mut self, id: ItemId, delta: i64) -> Result<i64, LedgerError> {
        // Writing implies the row lock, as an UPDATE would take it
        self.lock_for_update(id).await?;
        let held = self.held.get_mut(&id).ok_or(LedgerError::NotFound)?;

        let next = held
            .quantity()
            .checked_sub(delta)
            .filter(|quantity| *quantity >= 0)
            .ok_or(LedgerError::ConstraintViolation)?;
        held.staged = Some(next);
        Ok(next)
    }

    async fn commit(&mut self) -> Result<(), LedgerError> {
        for (_, held) in self.held.drain() {
            if let Some(quantity) = held.staged {
                let mut record = held.row.committed.write();
                record.quantity = quantity;
                record.assert_invariants();
            }
            // Row lock released here, after the new value is visible
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), LedgerError> {
        self.held.clear();
        Ok(())
    }
}
