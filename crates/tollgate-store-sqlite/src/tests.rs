//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use tollgate_core::{
  audit::{AccessAction, AccessOutcome, NewAccessAudit},
  device::DeviceKey,
  entitlement::{
    AccessState, EntitlementSource, EntitlementStatus, NewEntitlement,
  },
  source::{CheckoutStatus, NewCheckout, NewVoucher, VoucherRedemption},
  store::EntitlementStore,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn device(mac: &str) -> DeviceKey {
  DeviceKey::parse(mac).unwrap()
}

fn new_entitlement(
  key: &DeviceKey,
  source_ref: &str,
  ends_in: Duration,
) -> NewEntitlement {
  let now = Utc::now();
  NewEntitlement {
    device_key: key.clone(),
    owner_id:   None,
    start_at:   now,
    end_at:     now + ends_in,
    source:     EntitlementSource::Payment,
    source_ref: source_ref.to_string(),
  }
}

// ─── Entitlements ────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_entitlement() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:01");

  let e = s
    .create_entitlement(new_entitlement(&key, "pay_1", Duration::hours(1)))
    .await
    .unwrap();
  assert_eq!(e.status, EntitlementStatus::Active);
  assert_eq!(e.access_state, AccessState::NotGranted);
  assert_eq!(e.revoke_attempts, 0);

  let fetched = s.entitlement(e.id).await.unwrap().unwrap();
  assert_eq!(fetched.id, e.id);
  assert_eq!(fetched.device_key, key);
  assert_eq!(fetched.source_ref, "pay_1");
}

#[tokio::test]
async fn get_entitlement_missing_returns_none() {
  let s = store().await;
  assert!(s.entitlement(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_source_ref_is_rejected() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:02");

  s.create_entitlement(new_entitlement(&key, "pay_dup", Duration::hours(1)))
    .await
    .unwrap();
  let err = s
    .create_entitlement(new_entitlement(&key, "pay_dup", Duration::hours(2)))
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::DuplicateSourceRef(_)));
}

#[tokio::test]
async fn same_ref_under_different_source_is_allowed() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:03");

  s.create_entitlement(new_entitlement(&key, "ref_1", Duration::hours(1)))
    .await
    .unwrap();

  let mut voucher_input = new_entitlement(&key, "ref_1", Duration::hours(1));
  voucher_input.source = EntitlementSource::Voucher;
  s.create_entitlement(voucher_input).await.unwrap();
}

#[tokio::test]
async fn find_by_source_matches_the_dedup_key() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:04");

  let e = s
    .create_entitlement(new_entitlement(&key, "pay_2", Duration::hours(1)))
    .await
    .unwrap();

  let found = s
    .find_by_source(EntitlementSource::Payment, "pay_2")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.id, e.id);

  assert!(
    s.find_by_source(EntitlementSource::Voucher, "pay_2")
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn current_for_device_picks_newest_active_window() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:05");

  let old = s
    .create_entitlement(new_entitlement(&key, "pay_old", Duration::hours(1)))
    .await
    .unwrap();
  let newer = s
    .create_entitlement(new_entitlement(&key, "pay_new", Duration::hours(2)))
    .await
    .unwrap();

  let current = s
    .current_for_device(&key, Utc::now())
    .await
    .unwrap()
    .unwrap();
  // Both are active; the most recently created one drives controller state.
  assert_eq!(current.id, newer.id);
  assert_ne!(current.id, old.id);
}

#[tokio::test]
async fn current_for_device_ignores_expired_and_closed() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:06");

  // Window already over.
  s.create_entitlement(new_entitlement(&key, "pay_3", Duration::seconds(-10)))
    .await
    .unwrap();
  // Cancelled row with a future window.
  let cancelled = s
    .create_entitlement(new_entitlement(&key, "pay_4", Duration::hours(1)))
    .await
    .unwrap();
  s.close_entitlement(
    cancelled.id,
    EntitlementStatus::Cancelled,
    AccessState::Revoked,
  )
  .await
  .unwrap();

  assert!(
    s.current_for_device(&key, Utc::now())
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn revoke_candidates_finds_overdue_and_cancelled() {
  let s = store().await;
  let expired_key = device("aa:bb:cc:dd:ee:07");
  let live_key    = device("aa:bb:cc:dd:ee:08");
  let cancel_key  = device("aa:bb:cc:dd:ee:09");

  let expired = s
    .create_entitlement(new_entitlement(
      &expired_key,
      "pay_5",
      Duration::seconds(-5),
    ))
    .await
    .unwrap();
  s.create_entitlement(new_entitlement(&live_key, "pay_6", Duration::hours(1)))
    .await
    .unwrap();
  let cancelled = s
    .create_entitlement(new_entitlement(&cancel_key, "pay_7", Duration::hours(1)))
    .await
    .unwrap();
  s.close_entitlement(
    cancelled.id,
    EntitlementStatus::Cancelled,
    AccessState::RevokePending,
  )
  .await
  .unwrap();

  let candidates = s.revoke_candidates(Utc::now(), 10).await.unwrap();
  let ids: Vec<_> = candidates.iter().map(|e| e.id).collect();
  assert!(ids.contains(&expired.id));
  assert!(ids.contains(&cancelled.id));
  assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn revoke_candidates_respects_limit() {
  let s = store().await;

  for i in 0..5 {
    let key = device(&format!("aa:bb:cc:dd:01:{i:02x}"));
    s.create_entitlement(new_entitlement(
      &key,
      &format!("pay_l{i}"),
      Duration::seconds(-5),
    ))
    .await
    .unwrap();
  }

  let candidates = s.revoke_candidates(Utc::now(), 3).await.unwrap();
  assert_eq!(candidates.len(), 3);
}

#[tokio::test]
async fn set_access_state_roundtrip() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:0a");

  let e = s
    .create_entitlement(new_entitlement(&key, "pay_8", Duration::hours(1)))
    .await
    .unwrap();
  s.set_access_state(e.id, AccessState::Granted).await.unwrap();

  let fetched = s.entitlement(e.id).await.unwrap().unwrap();
  assert_eq!(fetched.access_state, AccessState::Granted);
  assert_eq!(fetched.status, EntitlementStatus::Active);
}

#[tokio::test]
async fn set_access_state_unknown_id_errors() {
  let s = store().await;
  let err = s
    .set_access_state(Uuid::new_v4(), AccessState::Granted)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::EntitlementNotFound(_)));
}

#[tokio::test]
async fn close_entitlement_sets_both_fields() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:0b");

  let e = s
    .create_entitlement(new_entitlement(&key, "pay_9", Duration::seconds(-5)))
    .await
    .unwrap();
  s.close_entitlement(e.id, EntitlementStatus::Expired, AccessState::Revoked)
    .await
    .unwrap();

  let fetched = s.entitlement(e.id).await.unwrap().unwrap();
  assert_eq!(fetched.status, EntitlementStatus::Expired);
  assert_eq!(fetched.access_state, AccessState::Revoked);
}

#[tokio::test]
async fn record_revoke_failure_counts_up() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:0c");

  let e = s
    .create_entitlement(new_entitlement(&key, "pay_10", Duration::seconds(-5)))
    .await
    .unwrap();

  assert_eq!(s.record_revoke_failure(e.id).await.unwrap(), 1);
  assert_eq!(s.record_revoke_failure(e.id).await.unwrap(), 2);

  let fetched = s.entitlement(e.id).await.unwrap().unwrap();
  assert_eq!(fetched.revoke_attempts, 2);
  assert_eq!(fetched.access_state, AccessState::RevokePending);
  // Logical status untouched; the sweeper decides when to close.
  assert_eq!(fetched.status, EntitlementStatus::Active);
}

// ─── Devices ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn touch_device_upserts() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:0d");

  let first = Utc::now() - Duration::minutes(5);
  s.touch_device(&key, Some("10.0.0.7".parse().unwrap()), first)
    .await
    .unwrap();

  let later = Utc::now();
  s.touch_device(&key, None, later).await.unwrap();

  let d = s.device(&key).await.unwrap().unwrap();
  assert_eq!(d.last_seen, later);
  // A contact without an address keeps the last known one.
  assert_eq!(d.address, Some("10.0.0.7".parse().unwrap()));
}

#[tokio::test]
async fn device_missing_returns_none() {
  let s = store().await;
  assert!(
    s.device(&device("aa:bb:cc:dd:ee:0e")).await.unwrap().is_none()
  );
}

// ─── Checkouts ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn checkout_roundtrip_and_status() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:0f");

  let checkout = s
    .create_checkout(NewCheckout {
      device_key:    key.clone(),
      owner_id:      None,
      duration_secs: 3600,
      amount_cents:  5000,
    })
    .await
    .unwrap();
  assert_eq!(checkout.status, CheckoutStatus::Pending);

  let fetched = s
    .checkout_by_ref(&checkout.checkout_ref)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(fetched.device_key, key);
  assert_eq!(fetched.duration_secs, 3600);

  s.set_checkout_status(&checkout.checkout_ref, CheckoutStatus::Paid)
    .await
    .unwrap();
  let fetched = s
    .checkout_by_ref(&checkout.checkout_ref)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(fetched.status, CheckoutStatus::Paid);
}

#[tokio::test]
async fn set_checkout_status_unknown_ref_errors() {
  let s = store().await;
  let err = s
    .set_checkout_status("co_missing", CheckoutStatus::Paid)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::CheckoutNotFound(_)));
}

// ─── Vouchers ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn voucher_consumed_until_exhausted() {
  let s = store().await;
  s.create_voucher(NewVoucher {
    code:          "WIFI-2USE".to_string(),
    duration_secs: 1800,
    uses:          2,
  })
  .await
  .unwrap();

  let first = s.consume_voucher("WIFI-2USE").await.unwrap();
  let VoucherRedemption::Redeemed(v) = first else {
    panic!("expected redemption, got {first:?}");
  };
  assert_eq!(v.uses_remaining, 1);

  let second = s.consume_voucher("WIFI-2USE").await.unwrap();
  assert!(matches!(second, VoucherRedemption::Redeemed(_)));

  let third = s.consume_voucher("WIFI-2USE").await.unwrap();
  assert!(matches!(third, VoucherRedemption::Exhausted));
}

#[tokio::test]
async fn voucher_lookup_without_consuming() {
  let s = store().await;
  s.create_voucher(NewVoucher {
    code:          "WIFI-PEEK".to_string(),
    duration_secs: 900,
    uses:          3,
  })
  .await
  .unwrap();

  let v = s.voucher("WIFI-PEEK").await.unwrap().unwrap();
  assert_eq!(v.uses_remaining, 3);
  assert!(s.voucher("WIFI-NONE").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_voucher_code_reported() {
  let s = store().await;
  let outcome = s.consume_voucher("NO-SUCH-CODE").await.unwrap();
  assert!(matches!(outcome, VoucherRedemption::UnknownCode));
}

#[tokio::test]
async fn duplicate_voucher_code_rejected() {
  let s = store().await;
  let input = NewVoucher {
    code:          "WIFI-DUP".to_string(),
    duration_secs: 1800,
    uses:          1,
  };
  s.create_voucher(input.clone()).await.unwrap();
  let err = s.create_voucher(input).await.unwrap_err();
  assert!(matches!(err, crate::Error::DuplicateVoucher(_)));
}

// ─── Free trials ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn trial_claim_is_one_per_device() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:10");

  assert!(s.claim_trial(&key, Utc::now()).await.unwrap());
  assert!(!s.claim_trial(&key, Utc::now()).await.unwrap());

  let other = device("aa:bb:cc:dd:ee:11");
  assert!(s.claim_trial(&other, Utc::now()).await.unwrap());
}

// ─── Access audit ────────────────────────────────────────────────────────────

#[tokio::test]
async fn audit_records_append_and_list_newest_first() {
  let s = store().await;
  let key = device("aa:bb:cc:dd:ee:12");

  s.record_access_audit(NewAccessAudit {
    entitlement_id: None,
    device_key:     key.clone(),
    action:         AccessAction::Grant,
    outcome:        AccessOutcome::Failed,
    attempts:       3,
    latency_ms:     1500,
    detail:         Some("connection refused".to_string()),
  })
  .await
  .unwrap();
  s.record_access_audit(NewAccessAudit {
    entitlement_id: Some(Uuid::new_v4()),
    device_key:     key.clone(),
    action:         AccessAction::Grant,
    outcome:        AccessOutcome::Ok,
    attempts:       1,
    latency_ms:     40,
    detail:         None,
  })
  .await
  .unwrap();

  let records = s.access_audit_for_device(&key, 10).await.unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].outcome, AccessOutcome::Ok);
  assert_eq!(records[1].attempts, 3);
  assert_eq!(records[1].detail.as_deref(), Some("connection refused"));
}
