//! HTTP API server for the checkout consistency core.
//!
//! Exposes checkout, manual order transitions, the audit trail, stock
//! administration and the payment-gateway webhook, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{CheckoutService, EffectDispatcher, ExpirySweeper, OrderPolicy, OrderStateMachine};
use inventory::StockLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use payments::PaymentGateway;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub checkout: CheckoutService<S>,
    pub machine: OrderStateMachine<S>,
    pub gateway: PaymentGateway<S>,
    pub ledger: StockLedger<S>,
}

impl<S: Store> AppState<S> {
    /// Wires every service over one store.
    pub fn new(
        store: S,
        policy: OrderPolicy,
        effects: EffectDispatcher,
        payment_server_key: impl Into<String>,
    ) -> Self {
        let machine = OrderStateMachine::new(store.clone(), policy).with_effects(effects.clone());
        Self {
            checkout: CheckoutService::new(store.clone(), &policy).with_effects(effects),
            gateway: PaymentGateway::new(machine.clone(), payment_server_key),
            ledger: StockLedger::new(store),
            machine,
        }
    }

    /// A sweeper sharing this state's machine and effect handlers.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        ExpirySweeper::new(self.machine.clone())
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/checkout", post(routes::checkout::place_order::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/transitions",
            get(routes::orders::history::<S>),
        )
        .route(
            "/orders/{id}/transitions/{name}",
            post(routes::orders::transition::<S>),
        )
        .route("/orders/{id}/payments", get(routes::orders::payments::<S>))
        .route("/webhooks/payment", post(routes::webhooks::payment::<S>))
        .route("/stock", get(routes::stock::list::<S>))
        .route("/stock/{product_id}", put(routes::stock::update::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
