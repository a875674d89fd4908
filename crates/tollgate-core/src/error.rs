//! Error types for `tollgate-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid device key: {0:?}")]
  InvalidDeviceKey(String),

  #[error("entitlement duration must be positive")]
  InvalidDuration,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
