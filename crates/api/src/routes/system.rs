//! Health and Prometheus endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}

/// Registers help text for every metric the core emits. Call once after the
/// recorder is installed.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "order_transitions_total",
        "Order transitions attempted, by transition and result"
    );
    metrics::describe_histogram!(
        "transition_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent applying one transition, lock to commit"
    );
    metrics::describe_counter!("webhook_events_total", "Payment callbacks by outcome");
    metrics::describe_counter!(
        "webhook_duplicates_total",
        "Payment callbacks acknowledged as redeliveries"
    );
    metrics::describe_counter!("reservations_created_total", "Stock holds placed");
    metrics::describe_counter!(
        "reservations_rejected_total",
        "Reservation attempts refused for insufficient stock"
    );
    metrics::describe_counter!("reservations_swept_total", "Expired holds released by the sweeper");
    metrics::describe_counter!(
        "side_effect_failures_total",
        "Post-commit side effects whose handler failed"
    );
    metrics::describe_counter!(
        "store_lock_timeouts_total",
        "Row lock waits that hit the lock timeout"
    );
}
