//! [`SqliteStore`] — the SQLite implementation of
//! [`tollgate_core::store::EntitlementStore`].

use std::{net::IpAddr, path::Path};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tollgate_core::{
  audit::{AccessAudit, NewAccessAudit},
  device::{Device, DeviceKey},
  entitlement::{
    AccessState, Entitlement, EntitlementSource, EntitlementStatus,
    NewEntitlement,
  },
  source::{
    Checkout, CheckoutStatus, NewCheckout, NewVoucher, Voucher,
    VoucherRedemption,
  },
  store::EntitlementStore,
};

use crate::{
  encode::{
    RawAudit, RawCheckout, RawDevice, RawEntitlement, RawVoucher,
    encode_access_state, encode_action, encode_checkout_status, encode_dt,
    encode_outcome, encode_source, encode_status, encode_uuid,
  },
  schema::SCHEMA,
  Error, Result,
};

const ENTITLEMENT_COLS: &str = "id, device_key, owner_id, start_at, end_at, \
   status, source, source_ref, access_state, revoke_attempts, created_at, \
   updated_at";

fn entitlement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntitlement> {
  Ok(RawEntitlement {
    id:              row.get(0)?,
    device_key:      row.get(1)?,
    owner_id:        row.get(2)?,
    start_at:        row.get(3)?,
    end_at:          row.get(4)?,
    status:          row.get(5)?,
    source:          row.get(6)?,
    source_ref:      row.get(7)?,
    access_state:    row.get(8)?,
    revoke_attempts: row.get(9)?,
    created_at:      row.get(10)?,
    updated_at:      row.get(11)?,
  })
}

fn is_unique_violation(err: &Error) -> bool {
  matches!(
    err,
    Error::Database(tokio_rusqlite::Error::Rusqlite(
      rusqlite::Error::SqliteFailure(e, _),
    )) if e.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tollgate store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a single-row entitlement SELECT and decode the result.
  async fn entitlement_query(
    &self,
    sql: String,
    params: Vec<String>,
  ) -> Result<Option<Entitlement>> {
    let raw: Option<RawEntitlement> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params_from_iter(params.iter()),
              entitlement_from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntitlement::into_entitlement).transpose()
  }
}

// ─── EntitlementStore impl ───────────────────────────────────────────────────

impl EntitlementStore for SqliteStore {
  type Error = Error;

  // ── Entitlements ──────────────────────────────────────────────────────────

  async fn create_entitlement(
    &self,
    input: NewEntitlement,
  ) -> Result<Entitlement> {
    let now = Utc::now();
    let entitlement = Entitlement {
      id:              Uuid::new_v4(),
      device_key:      input.device_key,
      owner_id:        input.owner_id,
      start_at:        input.start_at,
      end_at:          input.end_at,
      status:          EntitlementStatus::Active,
      source:          input.source,
      source_ref:      input.source_ref,
      access_state:    AccessState::NotGranted,
      revoke_attempts: 0,
      created_at:      now,
      updated_at:      now,
    };

    let id_str       = encode_uuid(entitlement.id);
    let device_str   = entitlement.device_key.to_string();
    let owner_str    = entitlement.owner_id.map(encode_uuid);
    let start_str    = encode_dt(entitlement.start_at);
    let end_str      = encode_dt(entitlement.end_at);
    let status_str   = encode_status(entitlement.status).to_owned();
    let source_str   = encode_source(entitlement.source).to_owned();
    let ref_str      = entitlement.source_ref.clone();
    let access_str   = encode_access_state(entitlement.access_state).to_owned();
    let created_str  = encode_dt(entitlement.created_at);
    let updated_str  = encode_dt(entitlement.updated_at);

    let inserted: Result<()> = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO entitlements (
             id, device_key, owner_id, start_at, end_at, status, source,
             source_ref, access_state, revoke_attempts, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)",
          rusqlite::params![
            id_str,
            device_str,
            owner_str,
            start_str,
            end_str,
            status_str,
            source_str,
            ref_str,
            access_str,
            created_str,
            updated_str,
          ],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::from);

    match inserted {
      Ok(()) => Ok(entitlement),
      Err(e) if is_unique_violation(&e) => {
        Err(Error::DuplicateSourceRef(entitlement.source_ref))
      }
      Err(e) => Err(e),
    }
  }

  async fn entitlement(&self, id: Uuid) -> Result<Option<Entitlement>> {
    self
      .entitlement_query(
        format!("SELECT {ENTITLEMENT_COLS} FROM entitlements WHERE id = ?1"),
        vec![encode_uuid(id)],
      )
      .await
  }

  async fn find_by_source(
    &self,
    source: EntitlementSource,
    source_ref: &str,
  ) -> Result<Option<Entitlement>> {
    self
      .entitlement_query(
        format!(
          "SELECT {ENTITLEMENT_COLS} FROM entitlements
           WHERE source = ?1 AND source_ref = ?2"
        ),
        vec![encode_source(source).to_owned(), source_ref.to_owned()],
      )
      .await
  }

  async fn current_for_device(
    &self,
    device: &DeviceKey,
    now: DateTime<Utc>,
  ) -> Result<Option<Entitlement>> {
    self
      .entitlement_query(
        format!(
          "SELECT {ENTITLEMENT_COLS} FROM entitlements
           WHERE device_key = ?1 AND status = 'active' AND end_at > ?2
           ORDER BY created_at DESC, rowid DESC
           LIMIT 1"
        ),
        vec![device.to_string(), encode_dt(now)],
      )
      .await
  }

  async fn entitlements_for_device(
    &self,
    device: &DeviceKey,
  ) -> Result<Vec<Entitlement>> {
    let device_str = device.to_string();

    let raws: Vec<RawEntitlement> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENTITLEMENT_COLS} FROM entitlements
           WHERE device_key = ?1
           ORDER BY created_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![device_str], entitlement_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawEntitlement::into_entitlement)
      .collect()
  }

  async fn revoke_candidates(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Entitlement>> {
    let now_str   = encode_dt(now);
    let limit_val = limit as i64;

    let raws: Vec<RawEntitlement> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENTITLEMENT_COLS} FROM entitlements
           WHERE (status = 'active' AND end_at <= ?1)
              OR (status = 'cancelled' AND access_state != 'revoked')
           ORDER BY end_at ASC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![now_str, limit_val], entitlement_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawEntitlement::into_entitlement)
      .collect()
  }

  async fn set_access_state(&self, id: Uuid, state: AccessState) -> Result<()> {
    let id_str     = encode_uuid(id);
    let state_str  = encode_access_state(state).to_owned();
    let now_str    = encode_dt(Utc::now());

    let changed: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE entitlements SET access_state = ?2, updated_at = ?3
           WHERE id = ?1",
          rusqlite::params![id_str, state_str, now_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::EntitlementNotFound(id));
    }
    Ok(())
  }

  async fn close_entitlement(
    &self,
    id: Uuid,
    status: EntitlementStatus,
    state: AccessState,
  ) -> Result<()> {
    let id_str     = encode_uuid(id);
    let status_str = encode_status(status).to_owned();
    let state_str  = encode_access_state(state).to_owned();
    let now_str    = encode_dt(Utc::now());

    let changed: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE entitlements
           SET status = ?2, access_state = ?3, updated_at = ?4
           WHERE id = ?1",
          rusqlite::params![id_str, status_str, state_str, now_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::EntitlementNotFound(id));
    }
    Ok(())
  }

  async fn record_revoke_failure(&self, id: Uuid) -> Result<u32> {
    let id_str  = encode_uuid(id);
    let now_str = encode_dt(Utc::now());

    let attempts: Option<i64> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE entitlements
           SET revoke_attempts = revoke_attempts + 1,
               access_state    = 'revoke_pending',
               updated_at      = ?2
           WHERE id = ?1",
          rusqlite::params![id_str, now_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        let n: i64 = conn.query_row(
          "SELECT revoke_attempts FROM entitlements WHERE id = ?1",
          rusqlite::params![id_str],
          |row| row.get(0),
        )?;
        Ok(Some(n))
      })
      .await?;

    match attempts {
      Some(n) => Ok(n as u32),
      None => Err(Error::EntitlementNotFound(id)),
    }
  }

  // ── Devices ───────────────────────────────────────────────────────────────

  async fn touch_device(
    &self,
    device: &DeviceKey,
    address: Option<IpAddr>,
    seen_at: DateTime<Utc>,
  ) -> Result<()> {
    let device_str = device.to_string();
    let addr_str   = address.map(|a| a.to_string());
    let seen_str   = encode_dt(seen_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO devices (device_key, address, last_seen)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (device_key) DO UPDATE SET
             address   = COALESCE(excluded.address, devices.address),
             last_seen = excluded.last_seen",
          rusqlite::params![device_str, addr_str, seen_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn device(&self, device: &DeviceKey) -> Result<Option<Device>> {
    let device_str = device.to_string();

    let raw: Option<RawDevice> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT device_key, address, last_seen FROM devices
               WHERE device_key = ?1",
              rusqlite::params![device_str],
              |row| {
                Ok(RawDevice {
                  device_key: row.get(0)?,
                  address:    row.get(1)?,
                  last_seen:  row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDevice::into_device).transpose()
  }

  // ── Payment checkouts ─────────────────────────────────────────────────────

  async fn create_checkout(&self, input: NewCheckout) -> Result<Checkout> {
    let checkout = Checkout {
      checkout_ref:  format!("co_{}", Uuid::new_v4().simple()),
      device_key:    input.device_key,
      owner_id:      input.owner_id,
      duration_secs: input.duration_secs,
      amount_cents:  input.amount_cents,
      status:        CheckoutStatus::Pending,
      created_at:    Utc::now(),
    };

    let ref_str     = checkout.checkout_ref.clone();
    let device_str  = checkout.device_key.to_string();
    let owner_str   = checkout.owner_id.map(encode_uuid);
    let duration    = checkout.duration_secs;
    let amount      = checkout.amount_cents;
    let status_str  = encode_checkout_status(checkout.status).to_owned();
    let created_str = encode_dt(checkout.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO checkouts (
             checkout_ref, device_key, owner_id, duration_secs, amount_cents,
             status, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            ref_str,
            device_str,
            owner_str,
            duration,
            amount,
            status_str,
            created_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(checkout)
  }

  async fn checkout_by_ref(&self, checkout_ref: &str) -> Result<Option<Checkout>> {
    let ref_str = checkout_ref.to_owned();

    let raw: Option<RawCheckout> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT checkout_ref, device_key, owner_id, duration_secs,
                      amount_cents, status, created_at
               FROM checkouts WHERE checkout_ref = ?1",
              rusqlite::params![ref_str],
              |row| {
                Ok(RawCheckout {
                  checkout_ref:  row.get(0)?,
                  device_key:    row.get(1)?,
                  owner_id:      row.get(2)?,
                  duration_secs: row.get(3)?,
                  amount_cents:  row.get(4)?,
                  status:        row.get(5)?,
                  created_at:    row.get(6)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCheckout::into_checkout).transpose()
  }

  async fn set_checkout_status(
    &self,
    checkout_ref: &str,
    status: CheckoutStatus,
  ) -> Result<()> {
    let ref_str    = checkout_ref.to_owned();
    let status_str = encode_checkout_status(status).to_owned();

    let changed: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE checkouts SET status = ?2 WHERE checkout_ref = ?1",
          rusqlite::params![ref_str, status_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::CheckoutNotFound(checkout_ref.to_owned()));
    }
    Ok(())
  }

  // ── Vouchers ──────────────────────────────────────────────────────────────

  async fn create_voucher(&self, input: NewVoucher) -> Result<Voucher> {
    let voucher = Voucher {
      code:           input.code,
      duration_secs:  input.duration_secs,
      uses_remaining: input.uses,
      created_at:     Utc::now(),
    };

    let code_str    = voucher.code.clone();
    let duration    = voucher.duration_secs;
    let uses        = voucher.uses_remaining as i64;
    let created_str = encode_dt(voucher.created_at);

    let inserted: Result<()> = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO vouchers (code, duration_secs, uses_remaining, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![code_str, duration, uses, created_str],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::from);

    match inserted {
      Ok(()) => Ok(voucher),
      Err(e) if is_unique_violation(&e) => {
        Err(Error::DuplicateVoucher(voucher.code))
      }
      Err(e) => Err(e),
    }
  }

  async fn voucher(&self, code: &str) -> Result<Option<Voucher>> {
    let code_str = code.to_owned();

    let raw: Option<RawVoucher> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT code, duration_secs, uses_remaining, created_at
               FROM vouchers WHERE code = ?1",
              rusqlite::params![code_str],
              |row| {
                Ok(RawVoucher {
                  code:           row.get(0)?,
                  duration_secs:  row.get(1)?,
                  uses_remaining: row.get(2)?,
                  created_at:     row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVoucher::into_voucher).transpose()
  }

  async fn consume_voucher(&self, code: &str) -> Result<VoucherRedemption> {
    let code_str = code.to_owned();

    // Decrement-if-available and re-read happen on the same connection, so
    // concurrent redemptions cannot double-spend the last use.
    let raw: Option<(bool, RawVoucher)> = self
      .conn
      .call(move |conn| {
        let consumed = conn.execute(
          "UPDATE vouchers SET uses_remaining = uses_remaining - 1
           WHERE code = ?1 AND uses_remaining > 0",
          rusqlite::params![code_str],
        )?;

        let row = conn
          .query_row(
            "SELECT code, duration_secs, uses_remaining, created_at
             FROM vouchers WHERE code = ?1",
            rusqlite::params![code_str],
            |row| {
              Ok(RawVoucher {
                code:           row.get(0)?,
                duration_secs:  row.get(1)?,
                uses_remaining: row.get(2)?,
                created_at:     row.get(3)?,
              })
            },
          )
          .optional()?;

        Ok(row.map(|r| (consumed == 1, r)))
      })
      .await?;

    match raw {
      None => Ok(VoucherRedemption::UnknownCode),
      Some((false, _)) => Ok(VoucherRedemption::Exhausted),
      Some((true, raw)) => Ok(VoucherRedemption::Redeemed(raw.into_voucher()?)),
    }
  }

  // ── Free trials ───────────────────────────────────────────────────────────

  async fn claim_trial(
    &self,
    device: &DeviceKey,
    claimed_at: DateTime<Utc>,
  ) -> Result<bool> {
    let device_str  = device.to_string();
    let claimed_str = encode_dt(claimed_at);

    let inserted: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO trial_claims (device_key, claimed_at)
           VALUES (?1, ?2)",
          rusqlite::params![device_str, claimed_str],
        )?)
      })
      .await?;

    Ok(inserted == 1)
  }

  // ── Access audit ──────────────────────────────────────────────────────────

  async fn record_access_audit(
    &self,
    input: NewAccessAudit,
  ) -> Result<AccessAudit> {
    let audit = AccessAudit {
      id:             Uuid::new_v4(),
      entitlement_id: input.entitlement_id,
      device_key:     input.device_key,
      action:         input.action,
      outcome:        input.outcome,
      attempts:       input.attempts,
      latency_ms:     input.latency_ms,
      detail:         input.detail,
      recorded_at:    Utc::now(),
    };

    let id_str       = encode_uuid(audit.id);
    let ent_str      = audit.entitlement_id.map(encode_uuid);
    let device_str   = audit.device_key.to_string();
    let action_str   = encode_action(audit.action).to_owned();
    let outcome_str  = encode_outcome(audit.outcome).to_owned();
    let attempts     = audit.attempts as i64;
    let latency      = audit.latency_ms as i64;
    let detail       = audit.detail.clone();
    let recorded_str = encode_dt(audit.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO access_audit (
             id, entitlement_id, device_key, action, outcome, attempts,
             latency_ms, detail, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            ent_str,
            device_str,
            action_str,
            outcome_str,
            attempts,
            latency,
            detail,
            recorded_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(audit)
  }

  async fn access_audit_for_device(
    &self,
    device: &DeviceKey,
    limit: usize,
  ) -> Result<Vec<AccessAudit>> {
    let device_str = device.to_string();
    let limit_val  = limit as i64;

    let raws: Vec<RawAudit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, entitlement_id, device_key, action, outcome, attempts,
                  latency_ms, detail, recorded_at
           FROM access_audit
           WHERE device_key = ?1
           ORDER BY recorded_at DESC
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![device_str, limit_val], |row| {
            Ok(RawAudit {
              id:             row.get(0)?,
              entitlement_id: row.get(1)?,
              device_key:     row.get(2)?,
              action:         row.get(3)?,
              outcome:        row.get(4)?,
              attempts:       row.get(5)?,
              latency_ms:     row.get(6)?,
              detail:         row.get(7)?,
              recorded_at:    row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAudit::into_audit).collect()
  }
}
