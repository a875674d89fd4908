//! Append-only audit records for controller operations.
//!
//! Every grant/revoke the engine issues writes one record: device, outcome,
//! attempt count, latency. The records feed the (external) admin dashboard
//! and manual reconciliation; the engine itself never reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceKey;

/// Which controller operation was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
  Grant,
  Revoke,
}

/// Terminal outcome of the operation, after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
  Ok,
  Failed,
}

/// One recorded controller operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessAudit {
  pub id:             Uuid,
  pub entitlement_id: Option<Uuid>,
  pub device_key:     DeviceKey,
  pub action:         AccessAction,
  pub outcome:        AccessOutcome,
  /// Attempts made, including the final one.
  pub attempts:       u32,
  pub latency_ms:     u64,
  /// Failure detail on `Failed`; empty on success.
  pub detail:         Option<String>,
  pub recorded_at:    DateTime<Utc>,
}

/// Input to [`crate::store::EntitlementStore::record_access_audit`].
/// `id` and `recorded_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAccessAudit {
  pub entitlement_id: Option<Uuid>,
  pub device_key:     DeviceKey,
  pub action:         AccessAction,
  pub outcome:        AccessOutcome,
  pub attempts:       u32,
  pub latency_ms:     u64,
  pub detail:         Option<String>,
}
