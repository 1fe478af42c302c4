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

//! Stock item records and purchase requests.
//!
//! Field names on the wire follow the established JSON contract:
//! items serialize as `{"ItemID", "Name", "Quantity"}` and purchase
//! requests are read from `{"ItemId", "Quantity"}`.

use crate::base::ItemId;
use serde::{Deserialize, Serialize};

/// A row of the stock ledger.
///
/// `quantity` is never negative in any committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "ItemID")]
    pub item_id: ItemId,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
}

impl Item {
    pub fn new(item_id: ItemId, name: impl Into<String>, quantity: i64) -> Self {
        Self {
            item_id,
            name: name.into(),
            quantity,
        }
    }
}

/// Request to deduct `quantity` units of an item.
///
/// Constructed per call and discarded once the purchase completes or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    #[serde(rename = "ItemId")]
    pub item_id: ItemId,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
}

impl PurchaseRequest {
    pub fn new(item_id: ItemId, quantity: i64) -> Self {
        Self { item_id, quantity }
    }
}
