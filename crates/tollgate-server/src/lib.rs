//! HTTP service for the Tollgate hotspot.
//!
//! Exposes an axum [`Router`] over any [`EntitlementStore`] +
//! [`AccessController`] pair: portal-facing purchase/redemption/reconnect
//! endpoints plus token-guarded admin endpoints. TLS termination and the
//! captive-portal UI itself live in front of this service.

pub mod auth;
pub mod error;
pub mod routes;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use tollgate_core::{access::AccessController, store::EntitlementStore};
use tollgate_engine::{Engine, EngineConfig, RetryPolicy};
use tollgate_routeros::RouterOsConfig;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` layered
/// with `TOLLGATE_`-prefixed environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:        String,
  pub port:        u16,
  pub store_path:  PathBuf,
  /// Bearer token required on admin endpoints.
  pub admin_token: String,

  /// Free-trial window handed out by the portal.
  #[serde(default = "default_trial_duration_secs")]
  pub trial_duration_secs: i64,

  pub routeros: RouterOsConfig,

  #[serde(default)]
  pub sweep: SweepConfig,
  #[serde(default)]
  pub retry: RetryConfig,
}

#[derive(Deserialize, Clone)]
pub struct SweepConfig {
  /// Seconds between sweep passes. Keep this short relative to the
  /// smallest sellable duration.
  #[serde(default = "default_sweep_interval_secs")]
  pub interval_secs: u64,
  #[serde(default = "default_sweep_batch_limit")]
  pub batch_limit: usize,
  #[serde(default = "default_max_revoke_failures")]
  pub max_revoke_failures: u32,
}

#[derive(Deserialize, Clone)]
pub struct RetryConfig {
  #[serde(default = "default_retry_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_retry_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_retry_max_delay_ms")]
  pub max_delay_ms: u64,
  #[serde(default = "default_retry_attempt_timeout_secs")]
  pub attempt_timeout_secs: u64,
  #[serde(default = "default_retry_op_timeout_secs")]
  pub op_timeout_secs: u64,
}

fn default_trial_duration_secs() -> i64 { 30 * 60 }
fn default_sweep_interval_secs() -> u64 { 15 }
fn default_sweep_batch_limit() -> usize { 100 }
fn default_max_revoke_failures() -> u32 { 5 }
fn default_retry_max_attempts() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 500 }
fn default_retry_max_delay_ms() -> u64 { 5_000 }
fn default_retry_attempt_timeout_secs() -> u64 { 10 }
fn default_retry_op_timeout_secs() -> u64 { 30 }

impl Default for SweepConfig {
  fn default() -> Self {
    Self {
      interval_secs:       default_sweep_interval_secs(),
      batch_limit:         default_sweep_batch_limit(),
      max_revoke_failures: default_max_revoke_failures(),
    }
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts:         default_retry_max_attempts(),
      base_delay_ms:        default_retry_base_delay_ms(),
      max_delay_ms:         default_retry_max_delay_ms(),
      attempt_timeout_secs: default_retry_attempt_timeout_secs(),
      op_timeout_secs:      default_retry_op_timeout_secs(),
    }
  }
}

impl ServerConfig {
  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      retry: RetryPolicy {
        max_attempts:    self.retry.max_attempts,
        base_delay:      Duration::from_millis(self.retry.base_delay_ms),
        max_delay:       Duration::from_millis(self.retry.max_delay_ms),
        attempt_timeout: Duration::from_secs(self.retry.attempt_timeout_secs),
        op_timeout:      Duration::from_secs(self.retry.op_timeout_secs),
      },
      sweep_batch_limit:   self.sweep.batch_limit,
      max_revoke_failures: self.sweep.max_revoke_failures,
    }
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep.interval_secs)
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, A> {
  pub engine: Arc<Engine<S, A>>,
  pub config: Arc<ServerConfig>,
}

impl<S, A> Clone for AppState<S, A> {
  fn clone(&self) -> Self {
    Self {
      engine: self.engine.clone(),
      config: self.config.clone(),
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
pub fn router<S, A>(state: AppState<S, A>) -> Router
where
  S: EntitlementStore + 'static,
  A: AccessController + 'static,
{
  Router::new()
    // Portal-facing
    .route("/api/checkouts",              post(routes::payments::create_checkout::<S, A>))
    .route("/api/callbacks/payment",      post(routes::payments::payment_callback::<S, A>))
    .route("/api/vouchers/redeem",        post(routes::vouchers::redeem::<S, A>))
    .route("/api/trials/claim",           post(routes::trials::claim::<S, A>))
    .route("/api/portal/reconnect",       post(routes::portal::reconnect::<S, A>))
    // Admin
    .route("/api/devices/{key}/entitlements", get(routes::admin::device_entitlements::<S, A>))
    .route("/api/devices/{key}/audit",        get(routes::admin::device_audit::<S, A>))
    .route("/api/entitlements/{id}/cancel",   post(routes::admin::cancel_entitlement::<S, A>))
    .route("/api/vouchers",                   post(routes::admin::create_voucher::<S, A>))
    .route("/api/access/entries",             get(routes::admin::access_entries::<S, A>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ───────────────────────────────────────────────────────
