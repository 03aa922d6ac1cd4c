//! Payment-gateway callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use payments::WebhookReceipt;
use serde_json::Value;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

/// POST /webhooks/payment: verify, deduplicate and apply a gateway
/// notification. Redeliveries answer 200 with `duplicate: true`.
pub async fn payment<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let receipt = state.gateway.process_event(payload).await?;
    Ok(Json(receipt))
}
