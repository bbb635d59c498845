//! Order placement, history and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use checkout::{PageRequest, Paginated, PlaceOrder};
use common::OrderId;
use serde::Deserialize;
use store::{Order, Store};

use crate::AppState;
use crate::error::ApiError;
use crate::identity::CurrentUser;

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// POST /orders: place an order from the caller's cart.
#[tracing::instrument(skip(state, req))]
pub async fn place<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.coordinator.place_order(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Paginated<Order>>, ApiError> {
    let page = PageRequest::new(
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(state.default_per_page),
    );
    let orders = state.coordinator.list_orders(user_id, page).await?;
    Ok(Json(orders))
}

/// GET /orders/{id}: one of the caller's orders with its items.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.coordinator.get_order(user_id, order_id).await?;
    Ok(Json(order))
}

/// DELETE /orders/{id}: cancel a pending or processing order.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.coordinator.cancel_order(user_id, order_id).await?;
    Ok(Json(order))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
