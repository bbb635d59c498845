//! HTTP API server for the storefront checkout.
//!
//! Exposes cart, order and admin endpoints over a [`Store`] backend,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, put};
use checkout::{CartService, CheckoutConfig, CheckoutCoordinator};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub coordinator: CheckoutCoordinator<S>,
    pub cart: CartService<S>,
    /// Page size used when a listing request does not give one.
    pub default_per_page: u32,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart",
            get(routes::cart::view::<S>)
                .post(routes::cart::add::<S>)
                .delete(routes::cart::clear::<S>),
        )
        .route(
            "/cart/{id}",
            put(routes::cart::update::<S>).delete(routes::cart::remove::<S>),
        )
        .route(
            "/orders",
            get(routes::orders::list::<S>).post(routes::orders::place::<S>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S>).delete(routes::orders::cancel::<S>),
        )
        .route(
            "/admin/orders/{id}",
            patch(routes::admin::update_status::<S>),
        )
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

/// Creates the application state over one store.
pub fn create_default_state<S: Store + Clone + 'static>(
    store: S,
    checkout: CheckoutConfig,
    default_per_page: u32,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        coordinator: CheckoutCoordinator::with_config(store.clone(), checkout),
        cart: CartService::new(store),
        default_per_page,
    })
}
