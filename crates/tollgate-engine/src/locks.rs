//! Per-device serialization.
//!
//! A sweeper revoke and a reconnect grant for the same device must not
//! interleave — the controller would end up disagreeing with the store, with
//! nobody scheduled to notice. Operations on different devices proceed fully
//! in parallel.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use tollgate_core::device::DeviceKey;

/// Lock table keyed by device. The table grows with the number of distinct
/// devices seen, which is bounded by the hotspot's fleet.
#[derive(Default)]
pub(crate) struct DeviceLocks {
  inner: Mutex<HashMap<DeviceKey, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
  pub async fn acquire(&self, device: &DeviceKey) -> OwnedMutexGuard<()> {
    let slot = {
      let mut table = self.inner.lock().await;
      table.entry(device.clone()).or_default().clone()
    };
    slot.lock_owned().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn same_device_serializes() {
    let locks = DeviceLocks::default();
    let key = DeviceKey::parse("aa:bb:cc:dd:ee:ff").unwrap();

    let guard = locks.acquire(&key).await;
    // A second acquisition must block until the first guard drops.
    let second = tokio::time::timeout(
      std::time::Duration::from_millis(20),
      locks.acquire(&key),
    )
    .await;
    assert!(second.is_err());

    drop(guard);
    locks.acquire(&key).await;
  }

  #[tokio::test]
  async fn different_devices_run_in_parallel() {
    let locks = DeviceLocks::default();
    let a = DeviceKey::parse("aa:bb:cc:dd:ee:01").unwrap();
    let b = DeviceKey::parse("aa:bb:cc:dd:ee:02").unwrap();

    let _guard_a = locks.acquire(&a).await;
    tokio::time::timeout(
      std::time::Duration::from_millis(20),
      locks.acquire(&b),
    )
    .await
    .expect("unrelated device must not block");
  }
}
