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

//! Storage abstraction for the stock ledger.
//!
//! A [`StockLedger`] owns the durable `ItemId -> (Name, Quantity)` record and
//! enforces `Quantity >= 0` itself, independent of any caller-side check.
//! Mutations happen inside a [`UnitOfWork`]:
//!
//! ```text
//!  begin ──► lock_for_update ──► apply_decrement ──► commit
//!                  │                    │
//!                  └──── rollback / drop ◄┘   (lock released, nothing applied)
//! ```
//!
//! Dropping a unit-of-work without committing aborts it. Row locks never
//! outlive their unit-of-work, so every exit path releases them.

use crate::base::ItemId;
use crate::error::LedgerError;
use crate::item::Item;
use async_trait::async_trait;

/// Durable store of stock items.
///
/// Implementations are shared across request handlers; each call to
/// [`begin`](StockLedger::begin) hands out an independent unit-of-work.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Idempotent structural setup, run once at startup.
    async fn create_schema_if_absent(&self) -> Result<(), LedgerError>;

    /// Provisions a new item row.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ConstraintViolation`] - `item.quantity` is negative.
    /// - [`LedgerError::Unavailable`] - the id is taken or the store failed.
    async fn insert(&self, item: &Item) -> Result<(), LedgerError>;

    /// Point lookup of the latest committed value. Never waits on row locks.
    async fn get(&self, id: ItemId) -> Result<Item, LedgerError>;

    /// Every committed item, ordered by id. Never waits on row locks.
    async fn list(&self) -> Result<Vec<Item>, LedgerError>;

    /// Opens a unit-of-work with its own connection/transaction handle.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError>;
}

/// An open transaction against the ledger.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Acquires the exclusive row lock for `id` and returns the row as seen
    /// under that lock.
    ///
    /// Blocks while another unit-of-work holds the same row. Readers are not
    /// blocked.
    async fn lock_for_update(&mut self, id: ItemId) -> Result<Item, LedgerError>;

    /// Sets `quantity = quantity - delta` and returns the new quantity.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ConstraintViolation`] - the result would be negative.
    /// - [`LedgerError::NotFound`] - no such row.
    async fn apply_decrement(&mut self, id: ItemId, delta: i64) -> Result<i64, LedgerError>;

    /// Publishes every change made in this unit-of-work and releases its locks.
    async fn commit(&mut self) -> Result<(), LedgerError>;

    /// Discards every change made in this unit-of-work and releases its locks.
    async fn rollback(&mut self) -> Result<(), LedgerError>;
}
