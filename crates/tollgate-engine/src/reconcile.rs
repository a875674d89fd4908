//! Reconnection reconciliation.
//!
//! When a device re-establishes a session (captive-portal re-auth), the
//! decision to grant comes from the store's time window alone — never from
//! the controller's current state, which may have drifted through a router
//! reboot, a lost grant ack, or a failed revoke. Re-granting is idempotent,
//! so the stored `access_state` is treated as a hint and corrected on the
//! way through.

use std::net::IpAddr;

use chrono::Utc;
use tracing::{debug, info};

use tollgate_core::{
  access::AccessController,
  device::DeviceKey,
  entitlement::{AccessState, Entitlement},
  store::EntitlementStore,
};

use crate::{Engine, EngineError, store_err};

/// Outcome of a reconnection decision.
#[derive(Debug, Clone)]
pub enum Reconnect {
  /// A current entitlement exists and the controller acknowledged the
  /// (re-)grant.
  Granted(Entitlement),
  /// No current entitlement; the device must purchase or claim one.
  Denied,
}

impl<S, A> Engine<S, A>
where
  S: EntitlementStore,
  A: AccessController,
{
  /// Handle a device reappearing on the network.
  ///
  /// This is also how devices whose paid activation lost its initial grant
  /// eventually get access: any reconnect within the window re-triggers the
  /// grant.
  pub async fn reconnect(
    &self,
    device: &DeviceKey,
    address: Option<IpAddr>,
  ) -> Result<Reconnect, EngineError> {
    let _guard = self.locks.acquire(device).await;
    let now = Utc::now();

    self
      .store
      .touch_device(device, address, now)
      .await
      .map_err(store_err)?;

    let Some(entitlement) = self
      .store
      .current_for_device(device, now)
      .await
      .map_err(store_err)?
    else {
      debug!(%device, "reconnect denied; no current entitlement");
      return Ok(Reconnect::Denied);
    };

    self
      .controlled_grant(
        Some(entitlement.id),
        device,
        address,
        entitlement.end_at,
      )
      .await?;

    self
      .store
      .set_access_state(entitlement.id, AccessState::Granted)
      .await
      .map_err(store_err)?;

    info!(
      entitlement = %entitlement.id,
      %device,
      end_at = %entitlement.end_at,
      "access re-granted on reconnect"
    );

    let entitlement = self
      .store
      .entitlement(entitlement.id)
      .await
      .map_err(store_err)?
      .ok_or(EngineError::NotFound(entitlement.id))?;

    Ok(Reconnect::Granted(entitlement))
  }
}
