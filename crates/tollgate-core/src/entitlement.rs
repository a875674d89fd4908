//! Entitlement types — the unit of paid, gifted, or trial network access.
//!
//! An entitlement records the *intent* window (`status`, `start_at`..`end_at`)
//! separately from the last acknowledged controller state (`access_state`).
//! The two drift under failure; the sweeper and the reconnection path exist
//! to converge them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceKey;

// ─── Lifecycle enums ─────────────────────────────────────────────────────────

/// Logical lifecycle of the entitlement window. Monotonic except
/// `Active → Cancelled`, which only an admin action takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
  Active,
  Expired,
  Cancelled,
}

/// Which external event produced the entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
  Payment,
  Voucher,
  FreeTrial,
}

/// Last acknowledged access-controller state for this entitlement's device.
///
/// A failed grant must never set `Granted`; a failed revoke parks the row in
/// `RevokePending` until a later sweep pass finishes the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
  NotGranted,
  Granted,
  RevokePending,
  Revoked,
}

// ─── Entitlement ─────────────────────────────────────────────────────────────

/// A time-bounded right to network access for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
  pub id:              Uuid,
  pub device_key:      DeviceKey,
  /// Account that purchased the access; vouchers and trials may be anonymous.
  pub owner_id:        Option<Uuid>,
  pub start_at:        DateTime<Utc>,
  pub end_at:          DateTime<Utc>,
  pub status:          EntitlementStatus,
  pub source:          EntitlementSource,
  /// Identifier of the payment / voucher / trial record behind this
  /// entitlement. `(source, source_ref)` is the activation dedup key.
  pub source_ref:      String,
  pub access_state:    AccessState,
  /// Terminal revoke failures recorded by the sweeper; drives the
  /// forced-close escape hatch.
  pub revoke_attempts: u32,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl Entitlement {
  /// True if the logical window entitles the device to access right now.
  pub fn is_current(&self, now: DateTime<Utc>) -> bool {
    self.status == EntitlementStatus::Active && self.end_at > now
  }
}

// ─── NewEntitlement ──────────────────────────────────────────────────────────

/// Input to [`crate::store::EntitlementStore::create_entitlement`].
///
/// `id` and the bookkeeping timestamps are assigned by the store; a new row
/// always starts as `Active` / `NotGranted`.
#[derive(Debug, Clone)]
pub struct NewEntitlement {
  pub device_key: DeviceKey,
  pub owner_id:   Option<Uuid>,
  pub start_at:   DateTime<Utc>,
  pub end_at:     DateTime<Utc>,
  pub source:     EntitlementSource,
  pub source_ref: String,
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, Utc};

  use super::*;
  use crate::device::DeviceKey;

  fn entitlement(status: EntitlementStatus, ends_in: Duration) -> Entitlement {
    let now = Utc::now();
    Entitlement {
      id:              Uuid::new_v4(),
      device_key:      DeviceKey::parse("aa:bb:cc:dd:ee:ff").unwrap(),
      owner_id:        None,
      start_at:        now - Duration::hours(1),
      end_at:          now + ends_in,
      status,
      source:          EntitlementSource::Voucher,
      source_ref:      "V-1".to_string(),
      access_state:    AccessState::NotGranted,
      revoke_attempts: 0,
      created_at:      now,
      updated_at:      now,
    }
  }

  #[test]
  fn active_with_future_end_is_current() {
    let e = entitlement(EntitlementStatus::Active, Duration::minutes(5));
    assert!(e.is_current(Utc::now()));
  }

  #[test]
  fn active_past_end_is_not_current() {
    let e = entitlement(EntitlementStatus::Active, Duration::minutes(-5));
    assert!(!e.is_current(Utc::now()));
  }

  #[test]
  fn cancelled_is_never_current() {
    let e = entitlement(EntitlementStatus::Cancelled, Duration::minutes(5));
    assert!(!e.is_current(Utc::now()));
  }
}
