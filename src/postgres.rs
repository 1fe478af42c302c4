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

//! PostgreSQL-backed stock ledger.
//!
//! ## Schema
//!
//! One table keyed by item id. Non-negativity is a table constraint, so it
//! holds for every writer, including ones that bypass this crate.
//!
//! ## Locking
//!
//! A unit-of-work is a `sqlx` transaction on its own pooled connection.
//! `lock_for_update` issues `SELECT … FOR UPDATE`, which serializes writers
//! of the same row while plain `SELECT`s keep reading the last committed
//! version. Dropping the transaction rolls it back; a lost connection makes
//! the server release the lock.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (check violation) | `23514` | `ConstraintViolation` |
//! | Database (unique violation) | `23505` | `Unavailable` (duplicate item) |
//! | RowNotFound | N/A | `NotFound` |
//! | Anything else | Any | `Unavailable` |

use crate::base::ItemId;
use crate::error::LedgerError;
use crate::item::Item;
use crate::ledger::{StockLedger, UnitOfWork};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::instrument;

const CHECK_VIOLATION: &str = "23514";
const UNIQUE_VIOLATION: &str = "23505";

const CREATE_ITEMS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS items (
        item_id  BIGINT PRIMARY KEY,
        name     TEXT   NOT NULL,
        quantity BIGINT NOT NULL,
        CONSTRAINT items_quantity_non_negative CHECK (quantity >= 0)
    )
"#;

/// Ledger stored in a PostgreSQL `items` table.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Wraps an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool against `dsn`.
    pub async fn connect(
        dsn: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(dsn)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StockLedger for PostgresLedger {
    async fn create_schema_if_absent(&self) -> Result<(), LedgerError> {
        sqlx::query(CREATE_ITEMS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_schema", e))?;
        Ok(())
    }

    async fn insert(&self, item: &Item) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO items (item_id, name, quantity) VALUES ($1, $2, $3)")
            .bind(i64::from(item.item_id.0))
            .bind(&item.name)
            .bind(item.quantity)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if has_code(&e, UNIQUE_VIOLATION) {
                    LedgerError::Unavailable(format!("duplicate item {}", item.item_id))
                } else {
                    map_sqlx_error("insert_item", e)
                }
            })?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn get(&self, id: ItemId) -> Result<Item, LedgerError> {
        let row = sqlx::query("SELECT item_id, name, quantity FROM items WHERE item_id = $1")
            .bind(i64::from(id.0))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?
            .ok_or(LedgerError::NotFound)?;
        item_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Item>, LedgerError> {
        let rows = sqlx::query("SELECT item_id, name, quantity FROM items ORDER BY item_id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx: Some(tx) }))
    }
}

/// Open transaction. `None` once committed or rolled back.
struct PostgresUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresUnitOfWork {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, LedgerError> {
        self.tx
            .as_mut()
            .ok_or_else(|| LedgerError::Unavailable("transaction already finished".into()))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(level = "debug", skip(self), err)]
    async fn lock_for_update(&mut self, id: ItemId) -> Result<Item, LedgerError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            "SELECT item_id, name, quantity FROM items WHERE item_id = $1 FOR UPDATE",
        )
        .bind(i64::from(id.0))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_for_update", e))?
        .ok_or(LedgerError::NotFound)?;
        item_from_row(&row)
    }

    async fn apply_decrement(&mut self, id: ItemId, delta: i64) -> Result<i64, LedgerError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            "UPDATE items SET quantity = quantity - $2 WHERE item_id = $1 RETURNING quantity",
        )
        .bind(i64::from(id.0))
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("apply_decrement", e))?
        .ok_or(LedgerError::NotFound)?;
        row.try_get("quantity")
            .map_err(|e| map_sqlx_error("apply_decrement", e))
    }

    async fn commit(&mut self) -> Result<(), LedgerError> {
        match self.tx.take() {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e)),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), LedgerError> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e)),
            None => Ok(()),
        }
    }
}

fn item_from_row(row: &PgRow) -> Result<Item, LedgerError> {
    let raw_id: i64 = row
        .try_get("item_id")
        .map_err(|e| map_sqlx_error("decode_item", e))?;
    let item_id = u32::try_from(raw_id)
        .map(ItemId)
        .map_err(|_| LedgerError::Unavailable(format!("item id {raw_id} out of range")))?;
    let name: String = row
        .try_get("name")
        .map_err(|e| map_sqlx_error("decode_item", e))?;
    let quantity: i64 = row
        .try_get("quantity")
        .map_err(|e| map_sqlx_error("decode_item", e))?;

    Ok(Item {
        item_id,
        name,
        quantity,
    })
}

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(code),
        _ => false,
    }
}

/// Map SQLx errors to ledger errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    if has_code(&err, CHECK_VIOLATION) {
        return LedgerError::ConstraintViolation;
    }
    match err {
        sqlx::Error::RowNotFound => LedgerError::NotFound,
        sqlx::Error::PoolClosed => {
            LedgerError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
