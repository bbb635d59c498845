//! Prometheus metrics endpoint and checkout metric descriptions.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for the metrics emitted by the checkout core.
pub fn describe() {
    describe_counter!("orders_placed_total", "Orders committed by checkout");
    describe_counter!(
        "orders_rejected_total",
        "Checkouts that ended without an order, by reason"
    );
    describe_counter!("orders_cancelled_total", "Orders cancelled by their owner");
    describe_counter!(
        "inventory_units_reserved_total",
        "Stock units taken by committed orders"
    );
    describe_counter!(
        "inventory_units_released_total",
        "Stock units returned by cancellations"
    );
    describe_histogram!(
        "checkout_duration_seconds",
        Unit::Seconds,
        "Time from cart snapshot to committed order"
    );
}

/// GET /metrics
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
