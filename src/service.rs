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

//! Inventory operations over an injected stock ledger.

use crate::base::ItemId;
use crate::error::{InventoryError, LedgerError};
use crate::item::{Item, PurchaseRequest};
use crate::ledger::{StockLedger, UnitOfWork};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, instrument, warn};

/// Caller-facing inventory operations.
///
/// Holds no mutable state of its own: all serialization of conflicting
/// purchases happens in the ledger's row locks, so any number of service
/// instances may share one ledger.
pub struct InventoryService {
    ledger: Arc<dyn StockLedger>,
    purchase_timeout: Duration,
}

impl InventoryService {
    pub const DEFAULT_PURCHASE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(ledger: Arc<dyn StockLedger>) -> Self {
        Self {
            ledger,
            purchase_timeout: Self::DEFAULT_PURCHASE_TIMEOUT,
        }
    }

    /// Bounds how long a purchase may wait for and work under its row lock.
    /// The commit itself is not bounded.
    pub fn with_purchase_timeout(mut self, timeout: Duration) -> Self {
        self.purchase_timeout = timeout;
        self
    }

    /// Returns the latest committed state of one item.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] - No item with this id.
    /// - [`InventoryError::StoreUnavailable`] - The ledger failed.
    pub async fn get_item(&self, id: ItemId) -> Result<Item, InventoryError> {
        Ok(self.ledger.get(id).await?)
    }

    /// Returns every item as of call time. An empty ledger yields an empty list.
    pub async fn list_all(&self) -> Result<Vec<Item>, InventoryError> {
        Ok(self.ledger.list().await?)
    }

    /// Deducts `request.quantity` units from an item's stock.
    ///
    /// Exactly one decrement is committed on success and none on any failure.
    /// Not idempotent: repeating a request purchases again.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidArgument`] - Quantity is zero or negative.
    /// - [`InventoryError::NotFound`] - No item with this id.
    /// - [`InventoryError::InsufficientStock`] - Stock under the row lock is too low.
    /// - [`InventoryError::StoreUnavailable`] - The ledger failed or the purchase timed out.
    #[instrument(
        skip(self, request),
        fields(item_id = %request.item_id, quantity = request.quantity)
    )]
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<Item, InventoryError> {
        if request.quantity <= 0 {
            return Err(InventoryError::invalid_argument("Quantity must be positive"));
        }

        // Fail fast on unknown items before taking any lock; the value read
        // here is stale and is not used for the stock check.
        self.ledger.get(request.item_id).await?;

        // Only the wait for and work under the row lock is bounded. Dropping
        // the in-flight future drops its unit-of-work, which releases the
        // row lock without applying anything.
        let (mut uow, item) =
            match time::timeout(self.purchase_timeout, self.stage_decrement(request)).await {
                Ok(staged) => staged?,
                Err(_) => {
                    warn!(timeout = ?self.purchase_timeout, "purchase timed out");
                    return Err(InventoryError::StoreUnavailable("purchase timed out".into()));
                }
            };

        // Once the commit is sent it may land in the store, so it always runs
        // to completion and its outcome is the one reported.
        uow.commit().await.map_err(|err| {
            error!(error = %err, "commit failed");
            InventoryError::from(err)
        })?;

        debug!(remaining = item.quantity, "purchase committed");
        Ok(item)
    }

    /// Locks the row, checks stock and applies the decrement without
    /// committing. Returns the open unit-of-work with the post-decrement item.
    async fn stage_decrement(
        &self,
        request: PurchaseRequest,
    ) -> Result<(Box<dyn UnitOfWork>, Item), InventoryError> {
        let mut uow = self.ledger.begin().await?;

        // Blocks while another purchase holds this row
        let item = uow.lock_for_update(request.item_id).await?;

        if item.quantity < request.quantity {
            debug!(available = item.quantity, "insufficient stock");
            abort(uow.as_mut()).await;
            return Err(InventoryError::InsufficientStock);
        }

        let remaining = match uow.apply_decrement(request.item_id, request.quantity).await {
            Ok(remaining) => remaining,
            Err(LedgerError::ConstraintViolation) => {
                warn!(
                    available = item.quantity,
                    "ledger rejected decrement that passed the stock check"
                );
                abort(uow.as_mut()).await;
                return Err(InventoryError::InsufficientStock);
            }
            Err(err) => {
                error!(error = %err, "decrement failed");
                abort(uow.as_mut()).await;
                return Err(err.into());
            }
        };

        Ok((
            uow,
            Item {
                quantity: remaining,
                ..item
            },
        ))
    }
}

/// Rolls back, logging rather than surfacing a failed rollback: the
/// caller's outcome is already decided and the store discards the
/// transaction on its own once the handle is dropped.
async fn abort(uow: &mut dyn UnitOfWork) {
    if let Err(err) = uow.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}
