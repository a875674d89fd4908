//! Bounded retry with backoff for controller calls.
//!
//! Only transient failures retry; a protocol failure is the router speaking,
//! and repeating the question will not change the answer. After the final
//! attempt the caller must assume neither that the operation happened nor
//! that it did not — the reconciliation paths own that ambiguity.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep, timeout};
use tracing::warn;

use tollgate_core::{access::AccessError, device::DeviceKey};

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts:    u32,
  /// Backoff between attempts is `base_delay × attempt`, capped at
  /// `max_delay`.
  pub base_delay:      Duration,
  pub max_delay:       Duration,
  /// Bound on a single attempt.
  pub attempt_timeout: Duration,
  /// Bound on the whole operation, backoff included, so one slow controller
  /// call cannot starve a sweep pass.
  pub op_timeout:      Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:    3,
      base_delay:      Duration::from_millis(500),
      max_delay:       Duration::from_secs(5),
      attempt_timeout: Duration::from_secs(10),
      op_timeout:      Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  fn backoff(&self, attempt: u32) -> Duration {
    (self.base_delay * attempt).min(self.max_delay)
  }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// Terminal outcome of a retried operation, with the figures the audit log
/// wants.
pub(crate) struct Attempted<T> {
  pub result:   Result<T, AccessError>,
  pub attempts: u32,
  pub latency:  Duration,
}

/// Run `call` under `policy`. Each attempt is individually bounded; a
/// timed-out attempt classifies as transient (the ack was lost, not
/// necessarily the effect).
pub(crate) async fn run_with_retry<T, F, Fut>(
  policy: &RetryPolicy,
  op: &str,
  device: &DeviceKey,
  mut call: F,
) -> Attempted<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, AccessError>>,
{
  let started = Instant::now();

  let bounded = async {
    let mut attempt = 1u32;
    loop {
      let outcome = match timeout(policy.attempt_timeout, call()).await {
        Ok(result) => result,
        Err(_) => Err(AccessError::Transient(format!(
          "{op} attempt timed out after {:?}",
          policy.attempt_timeout
        ))),
      };

      match outcome {
        Ok(value) => return (Ok(value), attempt),
        Err(error) if error.is_transient() && attempt < policy.max_attempts => {
          warn!(%device, op, attempt, %error, "controller call failed; retrying");
          sleep(policy.backoff(attempt)).await;
          attempt += 1;
        }
        Err(error) => {
          warn!(%device, op, attempt, %error, "controller call failed");
          return (Err(error), attempt);
        }
      }
    }
  };

  let (result, attempts) = match timeout(policy.op_timeout, bounded).await {
    Ok(done) => done,
    Err(_) => (
      Err(AccessError::Transient(format!(
        "{op} operation timed out after {:?}",
        policy.op_timeout
      ))),
      policy.max_attempts,
    ),
  };

  Attempted { result, attempts, latency: started.elapsed() }
}
