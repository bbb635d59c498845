//! Cart endpoints for the calling user.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::CartView;
use common::{CartLineId, ProductId};
use serde::{Deserialize, Serialize};
use store::{CartLine, Store};

use crate::AppState;
use crate::error::ApiError;
use crate::identity::CurrentUser;

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct RemovedResponse {
    pub message: &'static str,
    pub removed: u64,
}

/// GET /cart
#[tracing::instrument(skip(state))]
pub async fn view<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(state.cart.view(user_id).await?))
}

/// POST /cart: add a product, merging with an existing line.
#[tracing::instrument(skip(state, req))]
pub async fn add<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<CartLine>), ApiError> {
    let line = state
        .cart
        .add(user_id, req.product_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(line)))
}

/// PUT /cart/{id}
#[tracing::instrument(skip(state, req))]
pub async fn update<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCartRequest>,
) -> Result<Json<CartLine>, ApiError> {
    let line_id = parse_line_id(&id)?;
    let line = state.cart.update(user_id, line_id, req.quantity).await?;
    Ok(Json(line))
}

/// DELETE /cart/{id}
#[tracing::instrument(skip(state))]
pub async fn remove<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<RemovedResponse>, ApiError> {
    let line_id = parse_line_id(&id)?;
    state.cart.remove(user_id, line_id).await?;
    Ok(Json(RemovedResponse {
        message: "Item removed from cart",
        removed: 1,
    }))
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<RemovedResponse>, ApiError> {
    let removed = state.cart.clear(user_id).await?;
    Ok(Json(RemovedResponse {
        message: "Cart cleared",
        removed,
    }))
}

fn parse_line_id(id: &str) -> Result<CartLineId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
