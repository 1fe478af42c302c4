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

//! Error types for ledger access and inventory operations.

use thiserror::Error;

/// Failures reported by a [`StockLedger`](crate::StockLedger) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No row exists for the requested item
    #[error("item not found")]
    NotFound,

    /// The write would leave a negative quantity and was refused by the store
    #[error("quantity check constraint violated")]
    ConstraintViolation,

    /// Connectivity or transactional failure
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Caller-visible inventory errors.
///
/// Display strings of the client-side kinds are the stable messages returned
/// at the request boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Malformed request or non-positive purchase quantity
    #[error("{0}")]
    InvalidArgument(String),

    /// Referenced item does not exist
    #[error("No such item")]
    NotFound,

    /// Requested quantity exceeds the available stock
    #[error("Not enough quantity")]
    InsufficientStock,

    /// The ledger could not be reached or the unit-of-work failed
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl InventoryError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        InventoryError::InvalidArgument(message.into())
    }
}

impl From<LedgerError> for InventoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound => InventoryError::NotFound,
            // A lost race and a failed pre-check are indistinguishable to callers.
            LedgerError::ConstraintViolation => InventoryError::InsufficientStock,
            LedgerError::Unavailable(reason) => InventoryError::StoreUnavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InventoryError, LedgerError};

    #[test]
    fn error_display_messages() {
        assert_eq!(
            InventoryError::invalid_argument("No json body").to_string(),
            "No json body"
        );
        assert_eq!(InventoryError::NotFound.to_string(), "No such item");
        assert_eq!(
            InventoryError::InsufficientStock.to_string(),
            "Not enough quantity"
        );
        assert_eq!(
            InventoryError::StoreUnavailable("pool closed".into()).to_string(),
            "store unavailable: pool closed"
        );
        assert_eq!(LedgerError::NotFound.to_string(), "item not found");
        assert_eq!(
            LedgerError::ConstraintViolation.to_string(),
            "quantity check constraint violated"
        );
    }

    #[test]
    fn ledger_errors_collapse_into_inventory_kinds() {
        assert_eq!(
            InventoryError::from(LedgerError::NotFound),
            InventoryError::NotFound
        );
        assert_eq!(
            InventoryError::from(LedgerError::ConstraintViolation),
            InventoryError::InsufficientStock
        );
        assert_eq!(
            InventoryError::from(LedgerError::Unavailable("io".into())),
            InventoryError::StoreUnavailable("io".into())
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = InventoryError::InsufficientStock;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
