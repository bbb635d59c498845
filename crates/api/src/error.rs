//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout or cart failure.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    match &err {
        CheckoutError::EmptyCart
        | CheckoutError::InsufficientStock(_)
        | CheckoutError::OrderNotCancellable(_)
        | CheckoutError::InvalidQuantity(_)
        | CheckoutError::ProductUnavailable(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        CheckoutError::InvalidStatus(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        CheckoutError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "Order not found".to_string()),
        CheckoutError::ProductNotFound(_) => {
            (StatusCode::NOT_FOUND, "Product not found".to_string())
        }
        CheckoutError::CartLineNotFound(_) => {
            (StatusCode::NOT_FOUND, "Cart item not found".to_string())
        }
        CheckoutError::OrderCreationFailed | CheckoutError::OrderCancellationFailed => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        CheckoutError::Store(store_err @ StoreError::OutOfRange { .. }) => {
            (StatusCode::BAD_REQUEST, store_err.to_string())
        }
        CheckoutError::Store(store_err) => {
            tracing::error!(error = %store_err, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}
