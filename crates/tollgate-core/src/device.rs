//! Device identity types.
//!
//! A device is identified by its MAC address, normalized to one canonical
//! spelling so that store lookups, per-device locks, and controller entries
//! all agree on the same key.

use std::{fmt, net::IpAddr, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── DeviceKey ───────────────────────────────────────────────────────────────

/// Normalized device identity (a MAC address).
///
/// Parsing accepts `aa:bb:cc:dd:ee:ff`, `AA-BB-CC-DD-EE-FF`, dotted
/// `aabb.ccdd.eeff`, and bare 12-hex-digit forms. The canonical rendering is
/// uppercase and colon-separated — the spelling the RouterOS API reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceKey(String);

impl DeviceKey {
  pub fn parse(input: &str) -> Result<Self> {
    let hex: String = input
      .chars()
      .filter(|c| !matches!(c, ':' | '-' | '.'))
      .collect();

    if hex.len() != 12 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
      return Err(Error::InvalidDeviceKey(input.to_string()));
    }

    let upper = hex.to_ascii_uppercase();
    let mut canonical = String::with_capacity(17);
    for (i, pair) in upper.as_bytes().chunks(2).enumerate() {
      if i > 0 {
        canonical.push(':');
      }
      canonical.push(pair[0] as char);
      canonical.push(pair[1] as char);
    }

    Ok(Self(canonical))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for DeviceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for DeviceKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl TryFrom<String> for DeviceKey {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
}

impl From<DeviceKey> for String {
  fn from(key: DeviceKey) -> String { key.0 }
}

// ─── Device ──────────────────────────────────────────────────────────────────

/// Last-known network presence of a device. The engine only upserts
/// `address` and `last_seen` on portal contact; everything else about the
/// device lives with its entitlements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
  pub device_key: DeviceKey,
  pub address:    Option<IpAddr>,
  pub last_seen:  DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_accepts_common_forms() {
    for input in [
      "aa:bb:cc:dd:ee:ff",
      "AA-BB-CC-DD-EE-FF",
      "aabb.ccdd.eeff",
      "aabbccddeeff",
    ] {
      let key = DeviceKey::parse(input).unwrap();
      assert_eq!(key.as_str(), "AA:BB:CC:DD:EE:FF", "input: {input}");
    }
  }

  #[test]
  fn parse_rejects_bad_input() {
    for input in ["", "aa:bb:cc", "zz:bb:cc:dd:ee:ff", "aabbccddeeff00"] {
      assert!(DeviceKey::parse(input).is_err(), "input: {input}");
    }
  }

  #[test]
  fn canonical_forms_compare_equal() {
    let a = DeviceKey::parse("aa:bb:cc:dd:ee:ff").unwrap();
    let b = DeviceKey::parse("AABBCCDDEEFF").unwrap();
    assert_eq!(a, b);
  }
}
