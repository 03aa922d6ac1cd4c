//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::{CheckoutReceipt, PlaceOrder};
use store::{Actor, ActorKind, Store};

use crate::AppState;
use crate::error::ApiError;

/// POST /checkout: create an order and reserve its stock.
#[tracing::instrument(skip(state, request), fields(lines = request.lines.len()))]
pub async fn place_order<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let actor = Actor::new(ActorKind::Buyer, request.buyer_id.clone());
    let receipt = state.checkout.place_order(request, actor).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
