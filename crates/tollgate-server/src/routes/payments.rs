//! Handlers for the mobile-money purchase flow.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/checkouts` | Record purchase context, return `checkout_ref` |
//! | `POST` | `/api/callbacks/payment` | Gateway result callback; always 200 |
//!
//! The STK push itself is the gateway's business. This module only records
//! the request-time context (device, duration, amount) and resolves the
//! asynchronous callback against it.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tollgate_core::{
  access::AccessController,
  device::DeviceKey,
  entitlement::EntitlementSource,
  source::{CheckoutStatus, NewCheckout},
  store::EntitlementStore,
};
use tollgate_engine::ActivationRequest;

use crate::{AppState, error::ApiError};

// ─── Checkout ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutBody {
  pub device_key:    DeviceKey,
  pub duration_secs: i64,
  pub amount_cents:  i64,
  pub owner_id:      Option<Uuid>,
}

/// `POST /api/checkouts`
pub async fn create_checkout<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<CreateCheckoutBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  if body.duration_secs <= 0 {
    return Err(ApiError::BadRequest(
      "duration_secs must be positive".to_string(),
    ));
  }
  if body.amount_cents <= 0 {
    return Err(ApiError::BadRequest(
      "amount_cents must be positive".to_string(),
    ));
  }

  let checkout = state
    .engine
    .store()
    .create_checkout(NewCheckout {
      device_key:    body.device_key,
      owner_id:      body.owner_id,
      duration_secs: body.duration_secs,
      amount_cents:  body.amount_cents,
    })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  info!(
    checkout_ref = %checkout.checkout_ref,
    device = %checkout.device_key,
    "checkout recorded"
  );
  Ok((StatusCode::CREATED, Json(checkout)))
}

// ─── Gateway callback ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PaymentCallbackBody {
  /// Zero means the payment went through.
  pub result_code:  i64,
  pub checkout_ref: String,
  pub amount_cents: i64,
}

/// `POST /api/callbacks/payment`
///
/// Always answers 200 — the gateway retries on anything else, and retrying
/// cannot make an unknown reference resolvable. Duplicate success callbacks
/// are harmless: activation dedups on `(Payment, checkout_ref)`.
pub async fn payment_callback<S, A>(
  State(state): State<AppState<S, A>>,
  Json(body): Json<PaymentCallbackBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  let store = state.engine.store();

  let Some(checkout) = store
    .checkout_by_ref(&body.checkout_ref)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
  else {
    warn!(checkout_ref = %body.checkout_ref, "callback for unknown checkout");
    return Ok(Json(json!({ "status": "ignored" })));
  };

  if body.result_code != 0 {
    if checkout.status == CheckoutStatus::Pending {
      store
        .set_checkout_status(&checkout.checkout_ref, CheckoutStatus::Failed)
        .await
        .map_err(|e| ApiError::Store(Box::new(e)))?;
    }
    info!(
      checkout_ref = %checkout.checkout_ref,
      result_code = body.result_code,
      "payment failed at the gateway"
    );
    return Ok(Json(json!({ "status": "failed" })));
  }

  if body.amount_cents != checkout.amount_cents {
    warn!(
      checkout_ref = %checkout.checkout_ref,
      expected = checkout.amount_cents,
      received = body.amount_cents,
      "callback amount mismatch; ignoring"
    );
    return Ok(Json(json!({ "status": "ignored" })));
  }

  let activation = state
    .engine
    .activate(ActivationRequest {
      source:     EntitlementSource::Payment,
      source_ref: checkout.checkout_ref.clone(),
      device_key: checkout.device_key.clone(),
      duration:   Duration::seconds(checkout.duration_secs),
      owner_id:   checkout.owner_id,
      address:    None,
    })
    .await?;

  store
    .set_checkout_status(&checkout.checkout_ref, CheckoutStatus::Paid)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  Ok(Json(json!({
    "status":         "ok",
    "entitlement_id": activation.entitlement.id,
    "end_at":         activation.entitlement.end_at,
    "reused":         activation.reused,
  })))
}
