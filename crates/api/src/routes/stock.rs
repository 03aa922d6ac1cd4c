//! Stock administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::StockKey;
use inventory::StockLevel;
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

/// Body of `PUT /stock/{product_id}`. Exactly one of `quantity` (absolute)
/// or `delta` (relative) must be given.
#[derive(Debug, Deserialize)]
pub struct UpdateStockRequest {
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub delta: Option<i64>,
}

/// GET /stock: every stock row with its held and reservable quantities.
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<StockLevel>>, ApiError> {
    Ok(Json(state.ledger.list().await?))
}

/// PUT /stock/{product_id}: set or adjust the on-hand count.
#[tracing::instrument(skip(state, request))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
    Json(request): Json<UpdateStockRequest>,
) -> Result<Json<StockLevel>, ApiError> {
    let key = match request.variant_id {
        Some(variant_id) => StockKey::variant(product_id, variant_id),
        None => StockKey::product(product_id),
    };

    let level = match (request.quantity, request.delta) {
        (Some(quantity), None) => state.ledger.set_stock(key, quantity).await?,
        (None, Some(delta)) => state.ledger.adjust_stock(key, delta).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of quantity or delta is required".to_string(),
            ));
        }
    };
    Ok(Json(level))
}
