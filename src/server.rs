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

//! HTTP surface for the inventory service.
//!
//! | Route | Input | Success |
//! |-------|-------|---------|
//! | `GET /query?ItemId=<id>` | item id | the item |
//! | `GET /query?type=ALL` | | every item |
//! | `GET /buy` (also `POST`) | `{"ItemId", "Quantity"}` body | the item after the purchase |
//!
//! `ItemId` takes precedence over `type`. Every failure is an
//! [`ErrorResponse`]; client-side kinds answer `400`, an unavailable store
//! answers `503`.

use crate::base::ItemId;
use crate::error::InventoryError;
use crate::item::{Item, PurchaseRequest};
use crate::service::InventoryService;
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, error, info};

// =============================================================================
// Request/Response DTOs
// =============================================================================

/// Query string of `GET /query`.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "ItemId")]
    pub item_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// =============================================================================
// Application State
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub inventory: Arc<InventoryService>,
}

impl AppState {
    pub fn new(inventory: InventoryService) -> Self {
        Self {
            inventory: Arc::new(inventory),
        }
    }
}

// =============================================================================
// Error Handling
// =============================================================================

pub struct AppError(InventoryError);

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            InventoryError::InvalidArgument(message) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message.clone())
            }
            InventoryError::NotFound => (StatusCode::BAD_REQUEST, "NOT_FOUND", self.0.to_string()),
            InventoryError::InsufficientStock => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_STOCK",
                self.0.to_string(),
            ),
            InventoryError::StoreUnavailable(reason) => {
                // The reason stays in the logs
                error!(%reason, "request failed: store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "Store unavailable".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn query_items(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) =
        params.map_err(|_| InventoryError::invalid_argument("No query parameters"))?;

    if let Some(raw_id) = params.item_id.as_deref().filter(|raw| !raw.is_empty()) {
        // An id the ledger could never hold is simply absent
        let id: ItemId = raw_id.parse().map_err(|_| InventoryError::NotFound)?;
        let item = state.inventory.get_item(id).await?;
        return Ok(Json(item).into_response());
    }

    if params.kind.as_deref() == Some("ALL") {
        let items = state.inventory.list_all().await?;
        return Ok(Json(items).into_response());
    }

    Err(InventoryError::invalid_argument("No query parameters").into())
}

async fn buy(
    State(state): State<AppState>,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<Json<Item>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(%rejection, "rejected purchase body");
        InventoryError::invalid_argument("No json body")
    })?;

    let item = state.inventory.purchase(request).await?;
    Ok(Json(item))
}

// =============================================================================
// Router
// =============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/query", get(query_items))
        .route("/buy", get(buy).post(buy))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Serves requests on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!(error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
