//! The entitlement & network-access reconciliation engine.
//!
//! Turns payment, voucher, and free-trial events into time-bounded
//! entitlements and keeps an external access controller in line with them.
//! The store's time window is the single source of truth for *intent*; the
//! controller is an actuator that drifts (reboots, timeouts, lost acks) and
//! is periodically re-synced. Two forces converge it: the [`sweep`]er pushes
//! toward revoked as windows close, and the [`reconcile`]r pushes toward
//! granted as entitled devices reconnect.

mod locks;
mod retry;

pub mod activation;
pub mod reconcile;
pub mod sweep;

pub use activation::{Activation, ActivationRequest};
pub use reconcile::Reconnect;
pub use retry::RetryPolicy;
pub use sweep::{SweepReport, run_sweeper};

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use tollgate_core::{
  access::{AccessController, AccessError},
  audit::{AccessAction, AccessOutcome, NewAccessAudit},
  device::DeviceKey,
  store::EntitlementStore,
};

use crate::locks::DeviceLocks;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Invalid(#[from] tollgate_core::Error),

  #[error("entitlement not found: {0}")]
  NotFound(Uuid),

  #[error("entitlement {0} is already closed")]
  AlreadyClosed(Uuid),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("controller error: {0}")]
  Access(#[from] AccessError),
}

pub(crate) fn store_err<E>(e: E) -> EngineError
where
  E: std::error::Error + Send + Sync + 'static,
{
  EngineError::Store(Box::new(e))
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Engine tunables. The sweep interval itself belongs to the caller that
/// drives [`run_sweeper`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub retry: RetryPolicy,
  /// Maximum candidates examined per sweep pass.
  pub sweep_batch_limit: usize,
  /// Failed sweep revokes tolerated before an entitlement is force-closed
  /// with a logged store/controller inconsistency.
  pub max_revoke_failures: u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      retry:               RetryPolicy::default(),
      sweep_batch_limit:   100,
      max_revoke_failures: 5,
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The reconciliation engine, generic over its storage backend and access
/// controller. All per-device mutations are serialized through an internal
/// lock table; operations on different devices proceed in parallel.
pub struct Engine<S, A> {
  store:      S,
  controller: A,
  locks:      DeviceLocks,
  config:     EngineConfig,
}

impl<S, A> Engine<S, A>
where
  S: EntitlementStore,
  A: AccessController,
{
  pub fn new(store: S, controller: A, config: EngineConfig) -> Self {
    Self {
      store,
      controller,
      locks: DeviceLocks::default(),
      config,
    }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn controller(&self) -> &A { &self.controller }

  /// Grant through the retry policy and append the audit record.
  ///
  /// Returns `EngineError::Access` on terminal controller failure; the
  /// caller decides whether that fails the whole operation (reconnect) or
  /// only defers convergence (activation).
  pub(crate) async fn controlled_grant(
    &self,
    entitlement_id: Option<Uuid>,
    device: &DeviceKey,
    address: Option<IpAddr>,
    until: DateTime<Utc>,
  ) -> Result<(), EngineError> {
    let attempted = retry::run_with_retry(&self.config.retry, "grant", device, || {
      self.controller.grant(device, address, until)
    })
    .await;

    self.audit(entitlement_id, device, AccessAction::Grant, &attempted).await?;
    attempted.result.map_err(EngineError::Access)
  }

  /// Revoke through the retry policy and append the audit record.
  pub(crate) async fn controlled_revoke(
    &self,
    entitlement_id: Option<Uuid>,
    device: &DeviceKey,
  ) -> Result<(), EngineError> {
    let attempted = retry::run_with_retry(&self.config.retry, "revoke", device, || {
      self.controller.revoke(device)
    })
    .await;

    self.audit(entitlement_id, device, AccessAction::Revoke, &attempted).await?;
    attempted.result.map_err(EngineError::Access)
  }

  async fn audit(
    &self,
    entitlement_id: Option<Uuid>,
    device: &DeviceKey,
    action: AccessAction,
    attempted: &retry::Attempted<()>,
  ) -> Result<(), EngineError> {
    let outcome = match attempted.result {
      Ok(()) => AccessOutcome::Ok,
      Err(_) => AccessOutcome::Failed,
    };
    self
      .store
      .record_access_audit(NewAccessAudit {
        entitlement_id,
        device_key: device.clone(),
        action,
        outcome,
        attempts: attempted.attempts,
        latency_ms: attempted.latency.as_millis() as u64,
        detail: attempted.result.as_ref().err().map(|e| e.to_string()),
      })
      .await
      .map_err(store_err)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests;
