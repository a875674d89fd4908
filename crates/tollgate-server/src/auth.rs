//! Bearer-token check for admin endpoints.
//!
//! Portal-facing routes (checkout, redeem, claim, reconnect) are open by
//! design — the captive portal fronts them. Admin routes require the
//! configured token.

use axum::http::{HeaderMap, header};

use crate::error::ApiError;

pub fn require_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), ApiError> {
  let value = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let token = value.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;

  if token != admin_token {
    return Err(ApiError::Unauthorized);
  }
  Ok(())
}
