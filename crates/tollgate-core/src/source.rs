//! External source records: payment checkouts, vouchers, trial claims.
//!
//! These are collaborator-owned lifecycles; the engine only consumes their
//! outcome as an `(source, source_ref, duration)` triple. They live in the
//! same store so the HTTP layer can resolve request-time context (which
//! device, how long) when a gateway callback or redemption arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceKey;

// ─── Payment checkouts ───────────────────────────────────────────────────────

/// Resolution state of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
  Pending,
  Paid,
  Failed,
}

/// Request-time context for a mobile-money purchase, written when the
/// checkout is initiated. The gateway callback carries only a result code
/// and the `checkout_ref`; device and duration are resolved from this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkout {
  /// Gateway correlation id; doubles as the entitlement `source_ref`.
  pub checkout_ref:  String,
  pub device_key:    DeviceKey,
  pub owner_id:      Option<Uuid>,
  pub duration_secs: i64,
  pub amount_cents:  i64,
  pub status:        CheckoutStatus,
  pub created_at:    DateTime<Utc>,
}

/// Input to [`crate::store::EntitlementStore::create_checkout`].
/// `checkout_ref`, `status`, and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewCheckout {
  pub device_key:    DeviceKey,
  pub owner_id:      Option<Uuid>,
  pub duration_secs: i64,
  pub amount_cents:  i64,
}

// ─── Vouchers ────────────────────────────────────────────────────────────────

/// A prepaid access code. Redeeming consumes one use atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
  pub code:           String,
  pub duration_secs:  i64,
  pub uses_remaining: u32,
  pub created_at:     DateTime<Utc>,
}

/// Input to [`crate::store::EntitlementStore::create_voucher`].
#[derive(Debug, Clone)]
pub struct NewVoucher {
  pub code:          String,
  pub duration_secs: i64,
  pub uses:          u32,
}

/// Outcome of a redemption attempt. A typed result rather than an error —
/// unknown and exhausted codes are expected portal traffic, not faults.
#[derive(Debug, Clone)]
pub enum VoucherRedemption {
  /// One use consumed; the returned voucher reflects the decremented count.
  Redeemed(Voucher),
  UnknownCode,
  Exhausted,
}
