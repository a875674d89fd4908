//! Handler for the captive-portal reconnection signal.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/portal/reconnect` | 200 with `access: granted\|denied` |

use std::net::IpAddr;

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;

use tollgate_core::{
  access::AccessController, device::DeviceKey, store::EntitlementStore,
};
use tollgate_engine::Reconnect;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ReconnectBody {
  pub device_key: DeviceKey,
  pub address:    Option<IpAddr>,
}

/// `POST /api/portal/reconnect`
///
/// A denial is a normal answer, not an error — the portal redirects the
/// device to the purchase page. A 502 means the router could not be reached
/// and the portal should have the device retry.
pub async fn reconnect<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<ReconnectBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  let outcome = state
    .engine
    .reconnect(&body.device_key, body.address)
    .await?;

  let response = match outcome {
    Reconnect::Granted(entitlement) => json!({
      "access":         "granted",
      "entitlement_id": entitlement.id,
      "end_at":         entitlement.end_at,
    }),
    Reconnect::Denied => json!({ "access": "denied" }),
  };
  Ok(Json(response))
}
