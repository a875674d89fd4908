//! Handler for voucher redemption.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/vouchers/redeem` | 404 unknown code, 409 exhausted |
//!
//! Voucher creation is an admin operation and lives in [`crate::routes::admin`].

use axum::{Json, extract::State};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use tollgate_core::{
  access::AccessController,
  device::DeviceKey,
  entitlement::EntitlementSource,
  source::VoucherRedemption,
  store::EntitlementStore,
};
use tollgate_engine::ActivationRequest;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct RedeemBody {
  pub code:       String,
  pub device_key: DeviceKey,
}

/// `POST /api/vouchers/redeem`
pub async fn redeem<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<RedeemBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  let redemption = state
    .engine
    .store()
    .consume_voucher(&body.code)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  let voucher = match redemption {
    VoucherRedemption::Redeemed(v) => v,
    VoucherRedemption::UnknownCode => {
      return Err(ApiError::NotFound("unknown voucher code".to_string()));
    }
    VoucherRedemption::Exhausted => {
      return Err(ApiError::Conflict(
        "voucher has no uses remaining".to_string(),
      ));
    }
  };

  info!(code = %voucher.code, device = %body.device_key, "voucher redeemed");

  // Each consumed use is its own activation event; the remaining-use count
  // makes the dedup ref unique per slot, so a crash-retry of this activation
  // cannot mint a second entitlement for the same consumed use.
  let activation = state
    .engine
    .activate(ActivationRequest {
      source:     EntitlementSource::Voucher,
      source_ref: format!("{}#{}", voucher.code, voucher.uses_remaining),
      device_key: body.device_key,
      duration:   Duration::seconds(voucher.duration_secs),
      owner_id:   None,
      address:    None,
    })
    .await?;

  Ok(Json(json!({
    "entitlement_id": activation.entitlement.id,
    "end_at":         activation.entitlement.end_at,
    "access_state":   activation.entitlement.access_state,
  })))
}
