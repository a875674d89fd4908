//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. UUIDs are stored as
//! hyphenated lowercase strings. Enums are stored as their serde snake_case
//! tags.

use chrono::{DateTime, Utc};
use tollgate_core::{
  audit::{AccessAction, AccessAudit, AccessOutcome},
  device::{Device, DeviceKey},
  entitlement::{
    AccessState, Entitlement, EntitlementSource, EntitlementStatus,
  },
  source::{Checkout, CheckoutStatus, Voucher},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Lifecycle enums ─────────────────────────────────────────────────────────

pub fn encode_status(s: EntitlementStatus) -> &'static str {
  match s {
    EntitlementStatus::Active => "active",
    EntitlementStatus::Expired => "expired",
    EntitlementStatus::Cancelled => "cancelled",
  }
}

pub fn decode_status(s: &str) -> Result<EntitlementStatus> {
  match s {
    "active" => Ok(EntitlementStatus::Active),
    "expired" => Ok(EntitlementStatus::Expired),
    "cancelled" => Ok(EntitlementStatus::Cancelled),
    other => Err(Error::Encoding(format!("entitlement status: {other:?}"))),
  }
}

pub fn encode_source(s: EntitlementSource) -> &'static str {
  match s {
    EntitlementSource::Payment => "payment",
    EntitlementSource::Voucher => "voucher",
    EntitlementSource::FreeTrial => "free_trial",
  }
}

pub fn decode_source(s: &str) -> Result<EntitlementSource> {
  match s {
    "payment" => Ok(EntitlementSource::Payment),
    "voucher" => Ok(EntitlementSource::Voucher),
    "free_trial" => Ok(EntitlementSource::FreeTrial),
    other => Err(Error::Encoding(format!("entitlement source: {other:?}"))),
  }
}

pub fn encode_access_state(s: AccessState) -> &'static str {
  match s {
    AccessState::NotGranted => "not_granted",
    AccessState::Granted => "granted",
    AccessState::RevokePending => "revoke_pending",
    AccessState::Revoked => "revoked",
  }
}

pub fn decode_access_state(s: &str) -> Result<AccessState> {
  match s {
    "not_granted" => Ok(AccessState::NotGranted),
    "granted" => Ok(AccessState::Granted),
    "revoke_pending" => Ok(AccessState::RevokePending),
    "revoked" => Ok(AccessState::Revoked),
    other => Err(Error::Encoding(format!("access state: {other:?}"))),
  }
}

pub fn encode_checkout_status(s: CheckoutStatus) -> &'static str {
  match s {
    CheckoutStatus::Pending => "pending",
    CheckoutStatus::Paid => "paid",
    CheckoutStatus::Failed => "failed",
  }
}

pub fn decode_checkout_status(s: &str) -> Result<CheckoutStatus> {
  match s {
    "pending" => Ok(CheckoutStatus::Pending),
    "paid" => Ok(CheckoutStatus::Paid),
    "failed" => Ok(CheckoutStatus::Failed),
    other => Err(Error::Encoding(format!("checkout status: {other:?}"))),
  }
}

pub fn encode_action(a: AccessAction) -> &'static str {
  match a {
    AccessAction::Grant => "grant",
    AccessAction::Revoke => "revoke",
  }
}

pub fn decode_action(s: &str) -> Result<AccessAction> {
  match s {
    "grant" => Ok(AccessAction::Grant),
    "revoke" => Ok(AccessAction::Revoke),
    other => Err(Error::Encoding(format!("access action: {other:?}"))),
  }
}

pub fn encode_outcome(o: AccessOutcome) -> &'static str {
  match o {
    AccessOutcome::Ok => "ok",
    AccessOutcome::Failed => "failed",
  }
}

pub fn decode_outcome(s: &str) -> Result<AccessOutcome> {
  match s {
    "ok" => Ok(AccessOutcome::Ok),
    "failed" => Ok(AccessOutcome::Failed),
    other => Err(Error::Encoding(format!("access outcome: {other:?}"))),
  }
}

// ─── DeviceKey / IpAddr ──────────────────────────────────────────────────────

pub fn decode_device_key(s: &str) -> Result<DeviceKey> {
  Ok(DeviceKey::parse(s)?)
}

pub fn decode_addr(s: &str) -> Result<std::net::IpAddr> {
  s.parse()
    .map_err(|_| Error::Encoding(format!("ip address: {s:?}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `entitlements` row.
pub struct RawEntitlement {
  pub id:              String,
  pub device_key:      String,
  pub owner_id:        Option<String>,
  pub start_at:        String,
  pub end_at:          String,
  pub status:          String,
  pub source:          String,
  pub source_ref:      String,
  pub access_state:    String,
  pub revoke_attempts: i64,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawEntitlement {
  pub fn into_entitlement(self) -> Result<Entitlement> {
    Ok(Entitlement {
      id:              decode_uuid(&self.id)?,
      device_key:      decode_device_key(&self.device_key)?,
      owner_id:        self.owner_id.as_deref().map(decode_uuid).transpose()?,
      start_at:        decode_dt(&self.start_at)?,
      end_at:          decode_dt(&self.end_at)?,
      status:          decode_status(&self.status)?,
      source:          decode_source(&self.source)?,
      source_ref:      self.source_ref,
      access_state:    decode_access_state(&self.access_state)?,
      revoke_attempts: self.revoke_attempts as u32,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `devices` row.
pub struct RawDevice {
  pub device_key: String,
  pub address:    Option<String>,
  pub last_seen:  String,
}

impl RawDevice {
  pub fn into_device(self) -> Result<Device> {
    Ok(Device {
      device_key: decode_device_key(&self.device_key)?,
      address:    self.address.as_deref().map(decode_addr).transpose()?,
      last_seen:  decode_dt(&self.last_seen)?,
    })
  }
}

/// Raw strings read directly from a `checkouts` row.
pub struct RawCheckout {
  pub checkout_ref:  String,
  pub device_key:    String,
  pub owner_id:      Option<String>,
  pub duration_secs: i64,
  pub amount_cents:  i64,
  pub status:        String,
  pub created_at:    String,
}

impl RawCheckout {
  pub fn into_checkout(self) -> Result<Checkout> {
    Ok(Checkout {
      checkout_ref:  self.checkout_ref,
      device_key:    decode_device_key(&self.device_key)?,
      owner_id:      self.owner_id.as_deref().map(decode_uuid).transpose()?,
      duration_secs: self.duration_secs,
      amount_cents:  self.amount_cents,
      status:        decode_checkout_status(&self.status)?,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `vouchers` row.
pub struct RawVoucher {
  pub code:           String,
  pub duration_secs:  i64,
  pub uses_remaining: i64,
  pub created_at:     String,
}

impl RawVoucher {
  pub fn into_voucher(self) -> Result<Voucher> {
    Ok(Voucher {
      code:           self.code,
      duration_secs:  self.duration_secs,
      uses_remaining: self.uses_remaining as u32,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `access_audit` row.
pub struct RawAudit {
  pub id:             String,
  pub entitlement_id: Option<String>,
  pub device_key:     String,
  pub action:         String,
  pub outcome:        String,
  pub attempts:       i64,
  pub latency_ms:     i64,
  pub detail:         Option<String>,
  pub recorded_at:    String,
}

impl RawAudit {
  pub fn into_audit(self) -> Result<AccessAudit> {
    Ok(AccessAudit {
      id:             decode_uuid(&self.id)?,
      entitlement_id: self
        .entitlement_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      device_key:     decode_device_key(&self.device_key)?,
      action:         decode_action(&self.action)?,
      outcome:        decode_outcome(&self.outcome)?,
      attempts:       self.attempts as u32,
      latency_ms:     self.latency_ms as u64,
      detail:         self.detail,
      recorded_at:    decode_dt(&self.recorded_at)?,
    })
  }
}
