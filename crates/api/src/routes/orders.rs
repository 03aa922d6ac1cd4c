//! Order read endpoints and manual transitions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::OrderId;
use domain::{Authority, Transition, TransitionContext, TransitionOutcome, available_transitions};
use serde::{Deserialize, Serialize};
use store::{
    Actor, ActorKind, Order, PaymentEvent, Reservation, Store, TransitionLogEntry,
    TransitionLogQuery,
};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

/// Body of `POST /orders/{id}/transitions/{name}`.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub actor: Actor,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TransitionRequest {
    fn into_context(self) -> TransitionContext {
        TransitionContext {
            actor: self.actor,
            reason: self.reason,
            payment_method: self.payment_method,
            payment_reference: self.payment_reference,
            tracking_number: self.tracking_number,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub transition: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub reservations: Vec<Reservation>,
    pub available_transitions: Vec<Transition>,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub order: Order,
    pub transition: Transition,
    pub log_entry: TransitionLogEntry,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            order: outcome.order,
            transition: outcome.transition,
            log_entry: outcome.log_entry,
        }
    }
}

// -- Handlers --

/// GET /orders/{id}: the order, its reservations and the manual
/// transitions currently open to it. `id` may be an order id or number.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = resolve(&state, &id).await?;
    let reservations = state.machine.reservations_for(order.id).await?;

    Ok(Json(OrderResponse {
        available_transitions: available_transitions(order.status, Authority::Manual),
        order,
        reservations,
    }))
}

/// POST /orders/{id}/transitions/{name}: run a manual transition.
#[tracing::instrument(skip(state, request))]
pub async fn transition<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, name)): Path<(String, String)>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let transition: Transition = name.parse()?;
    if request.actor.kind == ActorKind::PaymentGateway {
        return Err(ApiError::BadRequest(
            "the payment_gateway actor is reserved for webhook callbacks".to_string(),
        ));
    }

    let order = resolve(&state, &id).await?;
    let outcome = state
        .machine
        .transition(order.id, transition, request.into_context())
        .await?;
    Ok(Json(outcome.into()))
}

/// GET /orders/{id}/transitions: the order's audit trail.
#[tracing::instrument(skip(state))]
pub async fn history<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<TransitionLogEntry>>, ApiError> {
    let order = resolve(&state, &id).await?;

    let mut query = TransitionLogQuery::for_order(order.id);
    if let Some(name) = params.transition {
        let name = match name.parse::<Transition>() {
            Ok(transition) => transition.as_str().to_string(),
            Err(_) => name,
        };
        query = query.transition(name);
    }
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }

    Ok(Json(state.machine.store().query_transitions(query).await?))
}

/// GET /orders/{id}/payments: payment events received for the order.
#[tracing::instrument(skip(state))]
pub async fn payments<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PaymentEvent>>, ApiError> {
    let order = resolve(&state, &id).await?;
    Ok(Json(state.machine.payment_events(order.id).await?))
}

async fn resolve<S: Store>(state: &AppState<S>, id: &str) -> Result<Order, ApiError> {
    let found = match uuid::Uuid::parse_str(id) {
        Ok(uuid) => state.machine.store().get_order(OrderId::from_uuid(uuid)).await?,
        Err(_) => state.machine.store().get_order_by_number(id).await?,
    };
    found.ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}
