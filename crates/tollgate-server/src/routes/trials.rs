//! Handler for the one-per-device free trial.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/trials/claim` | 409 once a device has used its trial |

use axum::{Json, extract::State};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use tollgate_core::{
  access::AccessController,
  device::DeviceKey,
  entitlement::EntitlementSource,
  store::EntitlementStore,
};
use tollgate_engine::ActivationRequest;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ClaimBody {
  pub device_key: DeviceKey,
}

/// `POST /api/trials/claim`
pub async fn claim<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<ClaimBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  let claimed = state
    .engine
    .store()
    .claim_trial(&body.device_key, Utc::now())
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  if !claimed {
    return Err(ApiError::Conflict(
      "free trial already used on this device".to_string(),
    ));
  }

  info!(device = %body.device_key, "free trial claimed");

  // One claim per device, so the device key doubles as the trial record id.
  let activation = state
    .engine
    .activate(ActivationRequest {
      source:     EntitlementSource::FreeTrial,
      source_ref: body.device_key.to_string(),
      device_key: body.device_key,
      duration:   Duration::seconds(state.config.trial_duration_secs),
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
