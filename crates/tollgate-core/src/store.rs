//! The `EntitlementStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `tollgate-store-sqlite`).
//! Higher layers (`tollgate-engine`, `tollgate-server`) depend on this
//! abstraction, not on any concrete backend.
//!
//! Entitlement rows are never deleted: closed entitlements persist for audit,
//! and the single-active-window invariant is enforced at activation rather
//! than by a unique index.

use std::{future::Future, net::IpAddr};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  audit::{AccessAudit, NewAccessAudit},
  device::{Device, DeviceKey},
  entitlement::{
    AccessState, Entitlement, EntitlementSource, EntitlementStatus,
    NewEntitlement,
  },
  source::{Checkout, CheckoutStatus, NewCheckout, NewVoucher, Voucher,
    VoucherRedemption},
};

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Tollgate storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait EntitlementStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Entitlements ──────────────────────────────────────────────────────

  /// Persist a new entitlement with `status=Active`, `access_state=NotGranted`.
  ///
  /// `(source, source_ref)` is protected by a UNIQUE constraint as a backstop;
  /// a violation surfaces as a typed error, never a silent duplicate. The
  /// activation path deduplicates with [`find_by_source`] first.
  ///
  /// [`find_by_source`]: EntitlementStore::find_by_source
  fn create_entitlement(
    &self,
    input: NewEntitlement,
  ) -> impl Future<Output = Result<Entitlement, Self::Error>> + Send + '_;

  /// Retrieve an entitlement by id. Returns `None` if not found.
  fn entitlement(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Entitlement>, Self::Error>> + Send + '_;

  /// Look up the entitlement created for a given `(source, source_ref)` —
  /// the activation dedup key.
  fn find_by_source<'a>(
    &'a self,
    source: EntitlementSource,
    source_ref: &'a str,
  ) -> impl Future<Output = Result<Option<Entitlement>, Self::Error>> + Send + 'a;

  /// The most recently created entitlement for `device` with
  /// `status=Active` and `end_at > now`, if any. This row alone drives the
  /// expected controller state for the device.
  fn current_for_device<'a>(
    &'a self,
    device: &'a DeviceKey,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Entitlement>, Self::Error>> + Send + 'a;

  /// Full entitlement history for a device, newest first.
  fn entitlements_for_device<'a>(
    &'a self,
    device: &'a DeviceKey,
  ) -> impl Future<Output = Result<Vec<Entitlement>, Self::Error>> + Send + 'a;

  /// Entitlements owing the controller a revoke: `Active` rows whose window
  /// has closed (`end_at <= now`), plus `Cancelled` rows not yet `Revoked`.
  /// Bounded by `limit` so one slow pass cannot starve the next.
  fn revoke_candidates(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Entitlement>, Self::Error>> + Send + '_;

  /// Update only the controller-state field.
  fn set_access_state(
    &self,
    id: Uuid,
    state: AccessState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Close an entitlement: set `status` and `access_state` in one write.
  fn close_entitlement(
    &self,
    id: Uuid,
    status: EntitlementStatus,
    state: AccessState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record a terminal revoke failure: increments `revoke_attempts`, parks
  /// the row in `RevokePending`, and returns the new attempt count.
  fn record_revoke_failure(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  // ── Devices ───────────────────────────────────────────────────────────

  /// Upsert the device row with its latest network address and sighting.
  fn touch_device<'a>(
    &'a self,
    device: &'a DeviceKey,
    address: Option<IpAddr>,
    seen_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn device<'a>(
    &'a self,
    device: &'a DeviceKey,
  ) -> impl Future<Output = Result<Option<Device>, Self::Error>> + Send + 'a;

  // ── Payment checkouts ─────────────────────────────────────────────────

  /// Record request-time purchase context and return the generated
  /// `checkout_ref`.
  fn create_checkout(
    &self,
    input: NewCheckout,
  ) -> impl Future<Output = Result<Checkout, Self::Error>> + Send + '_;

  fn checkout_by_ref<'a>(
    &'a self,
    checkout_ref: &'a str,
  ) -> impl Future<Output = Result<Option<Checkout>, Self::Error>> + Send + 'a;

  fn set_checkout_status<'a>(
    &'a self,
    checkout_ref: &'a str,
    status: CheckoutStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Vouchers ──────────────────────────────────────────────────────────

  fn create_voucher(
    &self,
    input: NewVoucher,
  ) -> impl Future<Output = Result<Voucher, Self::Error>> + Send + '_;

  fn voucher<'a>(
    &'a self,
    code: &'a str,
  ) -> impl Future<Output = Result<Option<Voucher>, Self::Error>> + Send + 'a;

  /// Atomically consume one use of the voucher. Unknown and exhausted codes
  /// are reported in the [`VoucherRedemption`] value, not as errors.
  fn consume_voucher<'a>(
    &'a self,
    code: &'a str,
  ) -> impl Future<Output = Result<VoucherRedemption, Self::Error>> + Send + 'a;

  // ── Free trials ───────────────────────────────────────────────────────

  /// Claim the one-per-device free trial. Returns `false` if the device has
  /// already claimed it; the check-and-claim is atomic.
  fn claim_trial<'a>(
    &'a self,
    device: &'a DeviceKey,
    claimed_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Access audit ──────────────────────────────────────────────────────

  /// Append one controller-operation record. `recorded_at` is set by the
  /// store.
  fn record_access_audit(
    &self,
    input: NewAccessAudit,
  ) -> impl Future<Output = Result<AccessAudit, Self::Error>> + Send + '_;

  /// Recent audit records for a device, newest first.
  fn access_audit_for_device<'a>(
    &'a self,
    device: &'a DeviceKey,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AccessAudit>, Self::Error>> + Send + 'a;
}
