//! The [`AccessController`] trait — the engine's only view of the router.
//!
//! Implemented by `tollgate-routeros` against the real device and by scripted
//! doubles in tests. The engine treats the controller as an actuator: its
//! acknowledgments are recorded, but the entitlement store's time window
//! remains the single source of truth for intent.

use std::{future::Future, net::IpAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceKey;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failure of a single controller operation.
///
/// The split decides retry behavior: transient failures (timeout, connection
/// refused, unreachable) are retryable; protocol failures (explicit
/// rejection, malformed response) are surfaced immediately.
#[derive(Debug, Clone, Error)]
pub enum AccessError {
  #[error("transient controller failure: {0}")]
  Transient(String),

  #[error("controller protocol failure: {0}")]
  Protocol(String),
}

impl AccessError {
  pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One access-list entry as reported by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
  pub device_key: DeviceKey,
  pub address:    Option<IpAddr>,
  /// Expiry recorded alongside the entry, where the implementation keeps
  /// one. The controller never enforces it — the sweeper does.
  pub until:      Option<DateTime<Utc>>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the external network access-controller.
///
/// Both mutating operations are idempotent from the caller's point of view:
/// `grant` replaces any existing entry for the device rather than
/// duplicating it, and `revoke` of an absent entry succeeds. After an `Err`,
/// the caller may assume neither that the side effect landed nor that it did
/// not — the acknowledgment, not the effect, is what failed.
pub trait AccessController: Send + Sync {
  /// Add or replace the access-list entry for `device`, valid until `until`.
  fn grant(
    &self,
    device: &DeviceKey,
    address: Option<IpAddr>,
    until: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), AccessError>> + Send;

  /// Remove the access-list entry for `device`, if any.
  fn revoke(
    &self,
    device: &DeviceKey,
  ) -> impl Future<Output = Result<(), AccessError>> + Send;

  /// List all current entries. Used for admin diagnostics and by `grant`'s
  /// replace-if-exists step in implementations that need it.
  fn entries(
    &self,
  ) -> impl Future<Output = Result<Vec<AccessEntry>, AccessError>> + Send;
}
