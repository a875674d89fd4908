//! Admin handlers — all require the configured bearer token.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/api/devices/{key}/entitlements` | Full history, newest first |
//! | `GET`  | `/api/devices/{key}/audit` | Controller-operation log, `?limit=` |
//! | `POST` | `/api/entitlements/{id}/cancel` | Active only; 409 otherwise |
//! | `POST` | `/api/vouchers` | Create a voucher |
//! | `GET`  | `/api/access/entries` | Live access-list from the controller |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use tollgate_core::{
  access::{AccessController, AccessEntry},
  audit::AccessAudit,
  device::DeviceKey,
  entitlement::Entitlement,
  source::NewVoucher,
  store::EntitlementStore,
};

use crate::{AppState, auth::require_admin, error::ApiError};

fn parse_device(key: &str) -> Result<DeviceKey, ApiError> {
  DeviceKey::parse(key).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ─── Device history ──────────────────────────────────────────────────────────

/// `GET /api/devices/{key}/entitlements`
pub async fn device_entitlements<S, A>(
  State(state): State<AppState<S, A>>,
  headers: HeaderMap,
  Path(key): Path<String>,
) -> Result<Json<Vec<Entitlement>>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  require_admin(&headers, &state.config.admin_token)?;
  let device = parse_device(&key)?;

  let entitlements = state
    .engine
    .store()
    .entitlements_for_device(&device)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(entitlements))
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  pub limit: Option<usize>,
}

/// `GET /api/devices/{key}/audit[?limit=<n>]`
pub async fn device_audit<S, A>(
  State(state): State<AppState<S, A>>,
  headers: HeaderMap,
  Path(key): Path<String>,
  Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AccessAudit>>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  require_admin(&headers, &state.config.admin_token)?;
  let device = parse_device(&key)?;

  let records = state
    .engine
    .store()
    .access_audit_for_device(&device, params.limit.unwrap_or(50))
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(records))
}

// ─── Cancellation ────────────────────────────────────────────────────────────

/// `POST /api/entitlements/{id}/cancel`
pub async fn cancel_entitlement<S, A>(
  State(state): State<AppState<S, A>>,
  headers: HeaderMap,
  Path(id): Path<Uuid>,
) -> Result<Json<Entitlement>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  require_admin(&headers, &state.config.admin_token)?;

  let entitlement = state.engine.cancel(id).await?;
  info!(entitlement = %id, "entitlement cancelled by admin");
  Ok(Json(entitlement))
}

// ─── Vouchers ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateVoucherBody {
  pub code:          String,
  pub duration_secs: i64,
  pub uses:          u32,
}

/// `POST /api/vouchers`
pub async fn create_voucher<S, A>(
  State(state): State<AppState<S, A>>,
  headers: HeaderMap,
  Json(body): Json<CreateVoucherBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  require_admin(&headers, &state.config.admin_token)?;

  if body.code.trim().is_empty() {
    return Err(ApiError::BadRequest("code must not be empty".to_string()));
  }
  if body.duration_secs <= 0 {
    return Err(ApiError::BadRequest(
      "duration_secs must be positive".to_string(),
    ));
  }
  if body.uses == 0 {
    return Err(ApiError::BadRequest("uses must be positive".to_string()));
  }

  let store = state.engine.store();
  if store
    .voucher(&body.code)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .is_some()
  {
    return Err(ApiError::Conflict(format!(
      "voucher code {:?} already exists",
      body.code
    )));
  }

  let voucher = store
    .create_voucher(NewVoucher {
      code:          body.code,
      duration_secs: body.duration_secs,
      uses:          body.uses,
    })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  info!(code = %voucher.code, uses = voucher.uses_remaining, "voucher created");
  Ok((StatusCode::CREATED, Json(voucher)))
}

// ─── Controller diagnostics ──────────────────────────────────────────────────

/// `GET /api/access/entries` — what the controller actually holds right now,
/// drift included. Useful when reconciling the audit log against reality.
pub async fn access_entries<S, A>(
  State(state): State<AppState<S, A>>,
  headers: HeaderMap,
) -> Result<Json<Vec<AccessEntry>>, ApiError>
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  require_admin(&headers, &state.config.admin_token)?;

  let entries = state
    .engine
    .controller()
    .entries()
    .await
    .map_err(|e| ApiError::Upstream(e.to_string()))?;
  Ok(Json(entries))
}
