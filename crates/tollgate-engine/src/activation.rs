//! Activation: one successful external event → exactly one entitlement.
//!
//! The entitlement record is persisted before the controller is touched, so
//! the paid (or redeemed, or granted) benefit survives any controller
//! outage. A failed initial grant leaves `access_state = NotGranted`; the
//! device's next portal contact heals it through the reconciler.

use std::net::IpAddr;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tollgate_core::{
  access::AccessController,
  device::DeviceKey,
  entitlement::{AccessState, Entitlement, EntitlementSource, NewEntitlement},
  store::EntitlementStore,
};

use crate::{Engine, EngineError, store_err};

// ─── Request / result ────────────────────────────────────────────────────────

/// Input to [`Engine::activate`].
#[derive(Debug, Clone)]
pub struct ActivationRequest {
  pub source:     EntitlementSource,
  /// Id of the payment / voucher / trial record; `(source, source_ref)` is
  /// the dedup key for retried and duplicated events.
  pub source_ref: String,
  pub device_key: DeviceKey,
  pub duration:   Duration,
  pub owner_id:   Option<Uuid>,
  /// Network address to bind on the controller, when the portal knows it.
  pub address:    Option<IpAddr>,
}

/// Result of [`Engine::activate`].
#[derive(Debug, Clone)]
pub struct Activation {
  pub entitlement: Entitlement,
  /// True when the dedup key matched an existing entitlement and no new
  /// record was created.
  pub reused:      bool,
}

// ─── Activation ──────────────────────────────────────────────────────────────

impl<S, A> Engine<S, A>
where
  S: EntitlementStore,
  A: AccessController,
{
  /// Create an entitlement for a successful external event and grant access.
  ///
  /// Idempotent over `(source, source_ref)`: a duplicate event returns the
  /// original entitlement untouched. A terminal grant failure does *not*
  /// fail the activation — the record is kept and convergence is deferred to
  /// the reconnection path.
  pub async fn activate(
    &self,
    request: ActivationRequest,
  ) -> Result<Activation, EngineError> {
    if request.duration <= Duration::zero() {
      return Err(tollgate_core::Error::InvalidDuration.into());
    }

    let _guard = self.locks.acquire(&request.device_key).await;

    if let Some(existing) = self
      .store
      .find_by_source(request.source, &request.source_ref)
      .await
      .map_err(store_err)?
    {
      debug!(
        entitlement = %existing.id,
        source_ref = %request.source_ref,
        "duplicate activation event; returning existing entitlement"
      );
      return Ok(Activation { entitlement: existing, reused: true });
    }

    let now = Utc::now();

    // Repeat purchases do not stack: the prior window is left to expire
    // naturally and the controller ends up reflecting the newest grant.
    if let Some(prior) = self
      .store
      .current_for_device(&request.device_key, now)
      .await
      .map_err(store_err)?
    {
      debug!(
        prior = %prior.id,
        device = %request.device_key,
        "device already has an active window; creating an independent one"
      );
    }

    let entitlement = self
      .store
      .create_entitlement(NewEntitlement {
        device_key: request.device_key.clone(),
        owner_id:   request.owner_id,
        start_at:   now,
        end_at:     now + request.duration,
        source:     request.source,
        source_ref: request.source_ref,
      })
      .await
      .map_err(store_err)?;

    info!(
      entitlement = %entitlement.id,
      device = %entitlement.device_key,
      source = ?entitlement.source,
      end_at = %entitlement.end_at,
      "entitlement activated"
    );

    match self
      .controlled_grant(
        Some(entitlement.id),
        &entitlement.device_key,
        request.address,
        entitlement.end_at,
      )
      .await
    {
      Ok(()) => {
        self
          .store
          .set_access_state(entitlement.id, AccessState::Granted)
          .await
          .map_err(store_err)?;
      }
      Err(EngineError::Access(error)) => {
        warn!(
          entitlement = %entitlement.id,
          device = %entitlement.device_key,
          %error,
          "initial grant failed; next reconnect will heal it"
        );
      }
      Err(other) => return Err(other),
    }

    let entitlement = self
      .store
      .entitlement(entitlement.id)
      .await
      .map_err(store_err)?
      .ok_or(EngineError::NotFound(entitlement.id))?;

    Ok(Activation { entitlement, reused: false })
  }
}
