//! Engine tests against an in-memory SQLite store and a scripted controller.

use std::{
  collections::HashMap,
  net::IpAddr,
  sync::{Arc, Mutex},
  time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use tollgate_core::{
  access::{AccessController, AccessEntry, AccessError},
  audit::{AccessAction, AccessOutcome},
  device::DeviceKey,
  entitlement::{
    AccessState, EntitlementSource, EntitlementStatus, NewEntitlement,
  },
  store::EntitlementStore,
};
use tollgate_store_sqlite::SqliteStore;

use crate::{
  Activation, ActivationRequest, Engine, EngineConfig, EngineError, Reconnect,
  RetryPolicy,
};

// ─── Scripted controller ─────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
  entries:         HashMap<DeviceKey, DateTime<Utc>>,
  /// Upcoming grant calls that fail before touching `entries`.
  grant_failures:  u32,
  /// Upcoming revoke calls that fail before touching `entries`.
  revoke_failures: u32,
  /// Fail with a protocol error instead of a transient one.
  protocol_mode:   bool,
  grant_calls:     u32,
  revoke_calls:    u32,
}

#[derive(Clone, Default)]
struct MockController {
  state: Arc<Mutex<MockState>>,
}

impl MockController {
  fn fail_next_grants(&self, n: u32) {
    self.state.lock().unwrap().grant_failures = n;
  }

  fn fail_next_grants_with_protocol(&self, n: u32) {
    let mut s = self.state.lock().unwrap();
    s.grant_failures = n;
    s.protocol_mode = true;
  }

  fn fail_next_revokes(&self, n: u32) {
    self.state.lock().unwrap().revoke_failures = n;
  }

  fn grant_calls(&self) -> u32 { self.state.lock().unwrap().grant_calls }

  fn revoke_calls(&self) -> u32 { self.state.lock().unwrap().revoke_calls }

  fn until_for(&self, device: &DeviceKey) -> Option<DateTime<Utc>> {
    self.state.lock().unwrap().entries.get(device).copied()
  }

  fn has_entry(&self, device: &DeviceKey) -> bool {
    self.until_for(device).is_some()
  }

  fn failure(&self, s: &MockState, what: &str) -> AccessError {
    if s.protocol_mode {
      AccessError::Protocol(format!("{what} rejected"))
    } else {
      AccessError::Transient(format!("{what}: connection refused"))
    }
  }
}

impl AccessController for MockController {
  async fn grant(
    &self,
    device: &DeviceKey,
    _address: Option<IpAddr>,
    until: DateTime<Utc>,
  ) -> Result<(), AccessError> {
    let mut s = self.state.lock().unwrap();
    s.grant_calls += 1;
    if s.grant_failures > 0 {
      s.grant_failures -= 1;
      let err = self.failure(&s, "grant");
      return Err(err);
    }
    // Add-or-replace, matching the real client's contract.
    s.entries.insert(device.clone(), until);
    Ok(())
  }

  async fn revoke(&self, device: &DeviceKey) -> Result<(), AccessError> {
    let mut s = self.state.lock().unwrap();
    s.revoke_calls += 1;
    if s.revoke_failures > 0 {
      s.revoke_failures -= 1;
      let err = self.failure(&s, "revoke");
      return Err(err);
    }
    // Removing an absent entry is an idempotent no-op.
    s.entries.remove(device);
    Ok(())
  }

  async fn entries(&self) -> Result<Vec<AccessEntry>, AccessError> {
    let s = self.state.lock().unwrap();
    Ok(
      s.entries
        .iter()
        .map(|(device_key, until)| AccessEntry {
          device_key: device_key.clone(),
          address:    None,
          until:      Some(*until),
        })
        .collect(),
    )
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn fast_config() -> EngineConfig {
  EngineConfig {
    retry: RetryPolicy {
      max_attempts:    3,
      base_delay:      StdDuration::from_millis(1),
      max_delay:       StdDuration::from_millis(5),
      attempt_timeout: StdDuration::from_secs(1),
      op_timeout:      StdDuration::from_secs(2),
    },
    sweep_batch_limit:   10,
    max_revoke_failures: 3,
  }
}

async fn engine() -> (Engine<SqliteStore, MockController>, SqliteStore, MockController)
{
  let store = SqliteStore::open_in_memory().await.unwrap();
  let controller = MockController::default();
  let engine = Engine::new(store.clone(), controller.clone(), fast_config());
  (engine, store, controller)
}

fn device(mac: &str) -> DeviceKey {
  DeviceKey::parse(mac).unwrap()
}

fn payment_request(key: &DeviceKey, source_ref: &str) -> ActivationRequest {
  ActivationRequest {
    source:     EntitlementSource::Payment,
    source_ref: source_ref.to_string(),
    device_key: key.clone(),
    duration:   Duration::hours(1),
    owner_id:   None,
    address:    None,
  }
}

/// Insert an entitlement directly, bypassing activation — used to stage
/// expired or ungranted windows.
async fn seed_entitlement(
  store: &SqliteStore,
  key: &DeviceKey,
  source_ref: &str,
  ends_in: Duration,
  access: AccessState,
) -> uuid::Uuid {
  let now = Utc::now();
  let e = store
    .create_entitlement(NewEntitlement {
      device_key: key.clone(),
      owner_id:   None,
      start_at:   now - Duration::hours(1),
      end_at:     now + ends_in,
      source:     EntitlementSource::Payment,
      source_ref: source_ref.to_string(),
    })
    .await
    .unwrap();
  if access != AccessState::NotGranted {
    store.set_access_state(e.id, access).await.unwrap();
  }
  e.id
}

// ─── Activation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn activation_creates_and_grants() {
  let (engine, _store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:01");

  let Activation { entitlement, reused } =
    engine.activate(payment_request(&key, "pay_1")).await.unwrap();

  assert!(!reused);
  assert_eq!(entitlement.status, EntitlementStatus::Active);
  assert_eq!(entitlement.access_state, AccessState::Granted);
  assert_eq!(controller.until_for(&key), Some(entitlement.end_at));
}

#[tokio::test]
async fn duplicate_event_returns_original_entitlement() {
  // Submitting the same (source, source_ref) twice creates exactly one
  // entitlement.
  let (engine, store, _controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:02");

  let first = engine.activate(payment_request(&key, "pay_dup")).await.unwrap();
  let second =
    engine.activate(payment_request(&key, "pay_dup")).await.unwrap();

  assert!(!first.reused);
  assert!(second.reused);
  assert_eq!(first.entitlement.id, second.entitlement.id);
  assert_eq!(store.entitlements_for_device(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn activation_rejects_non_positive_duration() {
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:03");

  let mut request = payment_request(&key, "pay_bad");
  request.duration = Duration::zero();

  let err = engine.activate(request).await.unwrap_err();
  assert!(matches!(
    err,
    EngineError::Invalid(tollgate_core::Error::InvalidDuration)
  ));
  // No side effects: nothing stored, controller untouched.
  assert!(store.entitlements_for_device(&key).await.unwrap().is_empty());
  assert_eq!(controller.grant_calls(), 0);
}

#[tokio::test]
async fn transient_grant_failures_are_retried() {
  let (engine, _store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:04");

  controller.fail_next_grants(2);
  let activation =
    engine.activate(payment_request(&key, "pay_retry")).await.unwrap();

  assert_eq!(controller.grant_calls(), 3);
  assert_eq!(activation.entitlement.access_state, AccessState::Granted);
}

#[tokio::test]
async fn terminal_grant_failure_keeps_the_entitlement() {
  let (engine, _store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:05");

  // Three transient failures exhaust the retry budget.
  controller.fail_next_grants(3);
  let activation =
    engine.activate(payment_request(&key, "pay_lost")).await.unwrap();

  assert!(!activation.reused);
  assert_eq!(activation.entitlement.status, EntitlementStatus::Active);
  assert_eq!(activation.entitlement.access_state, AccessState::NotGranted);
  assert!(!controller.has_entry(&key));
}

#[tokio::test]
async fn protocol_failure_is_not_retried() {
  let (engine, _store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:06");

  controller.fail_next_grants_with_protocol(1);
  let activation =
    engine.activate(payment_request(&key, "pay_nak")).await.unwrap();

  assert_eq!(controller.grant_calls(), 1);
  assert_eq!(activation.entitlement.access_state, AccessState::NotGranted);
}

#[tokio::test]
async fn repeat_purchase_does_not_stack() {
  // One entitlement drives the expected controller state at a time — the
  // most recently granted window.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:07");

  let first = engine.activate(payment_request(&key, "pay_a")).await.unwrap();
  let mut second_request = payment_request(&key, "pay_b");
  second_request.duration = Duration::hours(2);
  let second = engine.activate(second_request).await.unwrap();

  assert_ne!(first.entitlement.id, second.entitlement.id);

  // Both rows stay active; the newest one is current.
  let current = store
    .current_for_device(&key, Utc::now())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(current.id, second.entitlement.id);

  // The controller holds exactly the newest window, not a sum.
  assert_eq!(controller.until_for(&key), Some(second.entitlement.end_at));
}

#[tokio::test]
async fn activation_writes_audit_trail() {
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:00:08");

  controller.fail_next_grants(3);
  engine.activate(payment_request(&key, "pay_audit")).await.unwrap();

  let records = store.access_audit_for_device(&key, 10).await.unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].action, AccessAction::Grant);
  assert_eq!(records[0].outcome, AccessOutcome::Failed);
  assert_eq!(records[0].attempts, 3);
  assert!(records[0].detail.is_some());
}

// ─── Reconnection ────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_heals_a_failed_grant() {
  // An Active, unexpired entitlement whose initial grant failed becomes
  // Granted on reconnect.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:01:01");

  let id = seed_entitlement(
    &store,
    &key,
    "pay_heal",
    Duration::minutes(30),
    AccessState::NotGranted,
  )
  .await;

  let outcome = engine
    .reconnect(&key, Some("10.0.0.9".parse().unwrap()))
    .await
    .unwrap();

  let Reconnect::Granted(entitlement) = outcome else {
    panic!("expected grant, got {outcome:?}");
  };
  assert_eq!(entitlement.id, id);
  assert_eq!(entitlement.access_state, AccessState::Granted);
  assert!(controller.has_entry(&key));
}

#[tokio::test]
async fn reconnect_without_entitlement_is_denied() {
  let (engine, _store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:01:02");

  let outcome = engine.reconnect(&key, None).await.unwrap();
  assert!(matches!(outcome, Reconnect::Denied));
  assert_eq!(controller.grant_calls(), 0);
}

#[tokio::test]
async fn reconnect_after_expiry_is_denied() {
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:01:03");

  seed_entitlement(
    &store,
    &key,
    "pay_over",
    Duration::minutes(-5),
    AccessState::Granted,
  )
  .await;

  let outcome = engine.reconnect(&key, None).await.unwrap();
  assert!(matches!(outcome, Reconnect::Denied));
  assert_eq!(controller.grant_calls(), 0);
}

#[tokio::test]
async fn reconnect_regrants_even_when_already_granted() {
  // The stored access_state is only a hint; the controller may have
  // rebooted and lost the entry.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:01:04");

  seed_entitlement(
    &store,
    &key,
    "pay_drift",
    Duration::minutes(30),
    AccessState::Granted,
  )
  .await;
  assert!(!controller.has_entry(&key));

  let outcome = engine.reconnect(&key, None).await.unwrap();
  assert!(matches!(outcome, Reconnect::Granted(_)));
  assert_eq!(controller.grant_calls(), 1);
  assert!(controller.has_entry(&key));
}

#[tokio::test]
async fn reconnect_updates_device_last_seen() {
  let (engine, store, _controller) = engine().await;
  let key = device("aa:bb:cc:dd:01:05");

  let before = Utc::now();
  engine
    .reconnect(&key, Some("10.0.0.42".parse().unwrap()))
    .await
    .unwrap();

  let d = store.device(&key).await.unwrap().unwrap();
  assert!(d.last_seen >= before);
  assert_eq!(d.address, Some("10.0.0.42".parse().unwrap()));
}

#[tokio::test]
async fn reconnect_surfaces_terminal_grant_failure() {
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:01:06");

  let id = seed_entitlement(
    &store,
    &key,
    "pay_down",
    Duration::minutes(30),
    AccessState::NotGranted,
  )
  .await;

  controller.fail_next_grants(3);
  let err = engine.reconnect(&key, None).await.unwrap_err();
  assert!(matches!(err, EngineError::Access(_)));

  // The entitlement itself is untouched and heals on a later reconnect.
  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Active);
  assert_eq!(e.access_state, AccessState::NotGranted);
}

// ─── Sweeping ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_closes_expired_and_revokes() {
  // After one pass, an overdue entitlement is Expired and the controller
  // holds no entry for its device.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:02:01");

  let id = seed_entitlement(
    &store,
    &key,
    "pay_exp",
    Duration::seconds(-10),
    AccessState::Granted,
  )
  .await;
  // Simulate the entry the original grant installed.
  controller
    .state
    .lock()
    .unwrap()
    .entries
    .insert(key.clone(), Utc::now());

  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.scanned, 1);
  assert_eq!(report.closed, 1);
  assert_eq!(report.failed, 0);

  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Expired);
  assert_eq!(e.access_state, AccessState::Revoked);
  assert!(!controller.has_entry(&key));
}

#[tokio::test]
async fn sweep_never_touches_open_windows() {
  // An unexpired window is never revoked.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:02:02");

  let id = seed_entitlement(
    &store,
    &key,
    "pay_live",
    Duration::minutes(30),
    AccessState::Granted,
  )
  .await;

  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.scanned, 0);
  assert_eq!(controller.revoke_calls(), 0);

  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Active);
}

#[tokio::test]
async fn sweep_revoke_of_absent_entry_succeeds() {
  // Revoking a device with no controller entry is a no-op success — e.g.
  // the router rebooted and lost the binding before expiry.
  let (engine, store, _controller) = engine().await;
  let key = device("aa:bb:cc:dd:02:03");

  let id = seed_entitlement(
    &store,
    &key,
    "pay_gone",
    Duration::seconds(-10),
    AccessState::Granted,
  )
  .await;

  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.closed, 1);
  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Expired);
}

#[tokio::test]
async fn failed_revoke_is_retried_next_pass() {
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:02:04");

  let id = seed_entitlement(
    &store,
    &key,
    "pay_stuck",
    Duration::seconds(-10),
    AccessState::Granted,
  )
  .await;
  controller
    .state
    .lock()
    .unwrap()
    .entries
    .insert(key.clone(), Utc::now());

  // Exhaust one whole operation's retry budget.
  controller.fail_next_revokes(3);
  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.failed, 1);
  assert_eq!(report.closed, 0);

  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Active);
  assert_eq!(e.access_state, AccessState::RevokePending);
  assert_eq!(e.revoke_attempts, 1);
  assert!(controller.has_entry(&key));

  // Controller healthy again: the next pass finishes the job.
  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.closed, 1);
  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Expired);
  assert_eq!(e.access_state, AccessState::Revoked);
  assert!(!controller.has_entry(&key));
}

#[tokio::test]
async fn unreachable_controller_forces_close_eventually() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let controller = MockController::default();
  // Tolerate a single failed pass before forcing the close.
  let mut config = fast_config();
  config.max_revoke_failures = 1;
  let engine = Engine::new(store.clone(), controller.clone(), config);

  let key = device("aa:bb:cc:dd:02:05");
  let id = seed_entitlement(
    &store,
    &key,
    "pay_dead",
    Duration::seconds(-10),
    AccessState::Granted,
  )
  .await;
  controller
    .state
    .lock()
    .unwrap()
    .entries
    .insert(key.clone(), Utc::now());

  controller.fail_next_revokes(3);
  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.forced, 1);

  let e = store.entitlement(id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Expired);
  assert_eq!(e.access_state, AccessState::Revoked);
  // The logged inconsistency: the controller still holds the binding.
  assert!(controller.has_entry(&key));
}

#[tokio::test]
async fn one_bad_candidate_does_not_abort_the_pass() {
  let (engine, store, controller) = engine().await;
  let stuck = device("aa:bb:cc:dd:02:06");
  let fine  = device("aa:bb:cc:dd:02:07");

  seed_entitlement(&store, &stuck, "pay_s1", Duration::seconds(-10), AccessState::Granted)
    .await;
  let fine_id =
    seed_entitlement(&store, &fine, "pay_s2", Duration::seconds(-5), AccessState::Granted)
      .await;

  // The first candidate (oldest end_at) eats the failures; the second
  // candidate's revoke succeeds in the same pass.
  controller.fail_next_revokes(3);
  let report = engine.sweep_once().await.unwrap();

  assert_eq!(report.scanned, 2);
  assert_eq!(report.failed, 1);
  assert_eq!(report.closed, 1);
  let e = store.entitlement(fine_id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Expired);
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_revokes_and_closes() {
  let (engine, _store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:03:01");

  let activation =
    engine.activate(payment_request(&key, "pay_c1")).await.unwrap();
  assert!(controller.has_entry(&key));

  let cancelled = engine.cancel(activation.entitlement.id).await.unwrap();
  assert_eq!(cancelled.status, EntitlementStatus::Cancelled);
  assert_eq!(cancelled.access_state, AccessState::Revoked);
  assert!(!controller.has_entry(&key));
}

#[tokio::test]
async fn cancel_is_rejected_for_closed_entitlements() {
  let (engine, _store, _controller) = engine().await;
  let key = device("aa:bb:cc:dd:03:02");

  let activation =
    engine.activate(payment_request(&key, "pay_c2")).await.unwrap();
  engine.cancel(activation.entitlement.id).await.unwrap();

  let err = engine.cancel(activation.entitlement.id).await.unwrap_err();
  assert!(matches!(err, EngineError::AlreadyClosed(_)));
}

#[tokio::test]
async fn cancel_unknown_id_errors() {
  let (engine, _store, _controller) = engine().await;
  let err = engine.cancel(uuid::Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn cancellation_with_failed_revoke_is_finished_by_the_sweeper() {
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:03:03");

  let activation =
    engine.activate(payment_request(&key, "pay_c3")).await.unwrap();

  controller.fail_next_revokes(3);
  let cancelled = engine.cancel(activation.entitlement.id).await.unwrap();
  assert_eq!(cancelled.status, EntitlementStatus::Cancelled);
  assert_eq!(cancelled.access_state, AccessState::RevokePending);
  assert!(controller.has_entry(&key));

  // The sweeper owns the outstanding revoke obligation.
  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.closed, 1);

  let e = store.entitlement(cancelled.id).await.unwrap().unwrap();
  assert_eq!(e.status, EntitlementStatus::Cancelled);
  assert_eq!(e.access_state, AccessState::Revoked);
  assert!(!controller.has_entry(&key));
}

// ─── End-to-end scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn paid_window_reconnect_then_expiry() {
  // Lifecycle scenario: activation, reconnect near the window's edge,
  // sweep after expiry, duplicate activation returning the original.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:04:01");

  let mut request = payment_request(&key, "pay_sc1");
  request.duration = Duration::milliseconds(200);
  let original = engine.activate(request.clone()).await.unwrap();

  // Reconnect while still inside the window.
  let outcome = engine.reconnect(&key, None).await.unwrap();
  assert!(matches!(outcome, Reconnect::Granted(_)));

  // Let the window lapse, then sweep.
  tokio::time::sleep(StdDuration::from_millis(250)).await;
  let report = engine.sweep_once().await.unwrap();
  assert_eq!(report.closed, 1);

  let e = store
    .entitlement(original.entitlement.id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(e.status, EntitlementStatus::Expired);
  assert_eq!(e.access_state, AccessState::Revoked);
  assert!(!controller.has_entry(&key));

  // A replayed payment callback still maps to the original entitlement.
  let replay = engine.activate(request).await.unwrap();
  assert!(replay.reused);
  assert_eq!(replay.entitlement.id, original.entitlement.id);
}

#[tokio::test]
async fn lost_grant_heals_on_reconnect_within_window() {
  // Scenario: the grant times out during activation, the device retries
  // five minutes later (here: immediately) and ends up Granted.
  let (engine, store, controller) = engine().await;
  let key = device("aa:bb:cc:dd:04:02");

  controller.fail_next_grants(3);
  let activation =
    engine.activate(payment_request(&key, "pay_sc2")).await.unwrap();
  assert_eq!(activation.entitlement.access_state, AccessState::NotGranted);
  assert!(!controller.has_entry(&key));

  let outcome = engine.reconnect(&key, None).await.unwrap();
  let Reconnect::Granted(entitlement) = outcome else {
    panic!("expected grant");
  };
  assert_eq!(entitlement.id, activation.entitlement.id);
  assert_eq!(entitlement.access_state, AccessState::Granted);
  assert_eq!(controller.until_for(&key), Some(entitlement.end_at));

  let e = store.entitlement(entitlement.id).await.unwrap().unwrap();
  assert_eq!(e.access_state, AccessState::Granted);
}
