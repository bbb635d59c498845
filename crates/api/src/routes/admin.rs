//! Administrative order endpoints. Access control is enforced upstream.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use store::{Order, Store};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::parse_order_id;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// PATCH /admin/orders/{id}: overwrite an order's status.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .coordinator
        .set_order_status(order_id, &req.status)
        .await?;
    Ok(Json(order))
}
