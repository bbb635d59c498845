//! Caller identity taken from the `x-user-id` header.
//!
//! Authentication happens upstream; this layer only trusts the opaque id.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Err(ApiError::Unauthorized(format!(
                "Missing {USER_ID_HEADER} header"
            )));
        };

        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .map(CurrentUser)
            .ok_or_else(|| {
                tracing::warn!("rejected request with malformed {USER_ID_HEADER} header");
                ApiError::Unauthorized(format!("Invalid {USER_ID_HEADER} header"))
            })
    }
}
