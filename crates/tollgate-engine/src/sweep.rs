//! Closing entitlements: the expiry sweeper and admin cancellation.
//!
//! The sweeper is the only path by which time moves an entitlement out of
//! `Active`. Cancellation is the separate, explicit admin transition — it
//! shares the revoke obligation, and a cancellation whose revoke fails is
//! finished by a later sweep pass.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use tollgate_core::{
  access::AccessController,
  entitlement::{AccessState, Entitlement, EntitlementStatus},
  store::EntitlementStore,
};

use crate::{Engine, EngineError, store_err};

// ─── Pass report ─────────────────────────────────────────────────────────────

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
  /// Candidates returned by the bounded query.
  pub scanned: usize,
  /// Entitlements closed with a controller-acknowledged revoke.
  pub closed:  usize,
  /// Entitlements force-closed after repeated revoke failures; the
  /// controller may still hold a binding for these.
  pub forced:  usize,
  /// Candidates left for the next pass (revoke or store failure).
  pub failed:  usize,
}

enum SweepOutcome {
  Closed,
  Forced,
  Deferred,
  /// Re-read under the lock showed nothing left to do.
  Skipped,
}

// ─── Sweeping ────────────────────────────────────────────────────────────────

impl<S, A> Engine<S, A>
where
  S: EntitlementStore,
  A: AccessController,
{
  /// One bounded pass over entitlements owing a revoke.
  ///
  /// Failures are strictly per-candidate; a bad row or a dead controller
  /// never aborts the rest of the pass.
  pub async fn sweep_once(&self) -> Result<SweepReport, EngineError> {
    let candidates = self
      .store
      .revoke_candidates(Utc::now(), self.config.sweep_batch_limit)
      .await
      .map_err(store_err)?;

    let mut report = SweepReport {
      scanned: candidates.len(),
      ..SweepReport::default()
    };

    for candidate in candidates {
      match self.sweep_candidate(&candidate).await {
        Ok(SweepOutcome::Closed) => report.closed += 1,
        Ok(SweepOutcome::Forced) => {
          report.forced += 1;
          report.closed += 1;
        }
        Ok(SweepOutcome::Deferred) => report.failed += 1,
        Ok(SweepOutcome::Skipped) => {}
        Err(error) => {
          warn!(
            entitlement = %candidate.id,
            device = %candidate.device_key,
            %error,
            "sweep candidate failed; will retry next pass"
          );
          report.failed += 1;
        }
      }
    }

    Ok(report)
  }

  async fn sweep_candidate(
    &self,
    candidate: &Entitlement,
  ) -> Result<SweepOutcome, EngineError> {
    let _guard = self.locks.acquire(&candidate.device_key).await;

    // Re-read under the lock: the row may have been closed since the query.
    let Some(current) = self
      .store
      .entitlement(candidate.id)
      .await
      .map_err(store_err)?
    else {
      return Ok(SweepOutcome::Skipped);
    };

    // A still-open window is never revoked, whatever the stale query said.
    let due = match current.status {
      EntitlementStatus::Active => current.end_at <= Utc::now(),
      EntitlementStatus::Cancelled => {
        current.access_state != AccessState::Revoked
      }
      EntitlementStatus::Expired => false,
    };
    if !due {
      return Ok(SweepOutcome::Skipped);
    }

    let closed_status = match current.status {
      EntitlementStatus::Cancelled => EntitlementStatus::Cancelled,
      _ => EntitlementStatus::Expired,
    };

    match self
      .controlled_revoke(Some(current.id), &current.device_key)
      .await
    {
      Ok(()) => {
        self
          .store
          .close_entitlement(current.id, closed_status, AccessState::Revoked)
          .await
          .map_err(store_err)?;
        info!(
          entitlement = %current.id,
          device = %current.device_key,
          status = ?closed_status,
          "entitlement closed and access revoked"
        );
        Ok(SweepOutcome::Closed)
      }
      Err(EngineError::Access(error)) => {
        let attempts = self
          .store
          .record_revoke_failure(current.id)
          .await
          .map_err(store_err)?;

        if attempts >= self.config.max_revoke_failures {
          self
            .store
            .close_entitlement(current.id, closed_status, AccessState::Revoked)
            .await
            .map_err(store_err)?;
          warn!(
            entitlement = %current.id,
            device = %current.device_key,
            attempts,
            %error,
            "revoke keeps failing; closing anyway — controller may still hold a binding"
          );
          Ok(SweepOutcome::Forced)
        } else {
          warn!(
            entitlement = %current.id,
            device = %current.device_key,
            attempts,
            %error,
            "revoke failed; deferred to next pass"
          );
          Ok(SweepOutcome::Deferred)
        }
      }
      Err(other) => Err(other),
    }
  }

  // ── Cancellation ──────────────────────────────────────────────────────────

  /// Admin cancellation of an active entitlement.
  ///
  /// Carries the same revoke obligation as expiry: on a terminal revoke
  /// failure the row is closed as `Cancelled`/`RevokePending` and the
  /// sweeper finishes the controller side later.
  pub async fn cancel(&self, id: Uuid) -> Result<Entitlement, EngineError> {
    let Some(entitlement) =
      self.store.entitlement(id).await.map_err(store_err)?
    else {
      return Err(EngineError::NotFound(id));
    };

    let _guard = self.locks.acquire(&entitlement.device_key).await;

    // Re-read under the lock; a sweep pass may have closed it meanwhile.
    let Some(current) = self.store.entitlement(id).await.map_err(store_err)?
    else {
      return Err(EngineError::NotFound(id));
    };
    if current.status != EntitlementStatus::Active {
      return Err(EngineError::AlreadyClosed(id));
    }

    match self.controlled_revoke(Some(id), &current.device_key).await {
      Ok(()) => {
        self
          .store
          .close_entitlement(id, EntitlementStatus::Cancelled, AccessState::Revoked)
          .await
          .map_err(store_err)?;
        info!(entitlement = %id, device = %current.device_key, "entitlement cancelled");
      }
      Err(EngineError::Access(error)) => {
        self
          .store
          .close_entitlement(
            id,
            EntitlementStatus::Cancelled,
            AccessState::RevokePending,
          )
          .await
          .map_err(store_err)?;
        warn!(
          entitlement = %id,
          device = %current.device_key,
          %error,
          "cancellation revoke failed; sweeper will finish it"
        );
      }
      Err(other) => return Err(other),
    }

    self
      .store
      .entitlement(id)
      .await
      .map_err(store_err)?
      .ok_or(EngineError::NotFound(id))
  }
}

// ─── Run loop ────────────────────────────────────────────────────────────────

/// Drive [`Engine::sweep_once`] forever on a fixed interval.
///
/// Passes never overlap: a pass that overruns its tick simply delays the
/// next one, and missed ticks are skipped rather than replayed as a burst.
/// The interval should be short relative to the smallest sellable duration;
/// it trades controller load against how far an expired window can over-run.
pub async fn run_sweeper<S, A>(engine: Arc<Engine<S, A>>, interval: Duration)
where
  S: EntitlementStore,
  A: AccessController,
{
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    ticker.tick().await;
    match engine.sweep_once().await {
      Ok(report) if report.scanned > 0 => {
        info!(
          scanned = report.scanned,
          closed = report.closed,
          forced = report.forced,
          failed = report.failed,
          "sweep pass complete"
        );
      }
      Ok(_) => {}
      Err(error) => warn!(%error, "sweep pass failed"),
    }
  }
}
