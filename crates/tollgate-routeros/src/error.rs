//! Error type for `tollgate-routeros`.

use thiserror::Error;
use tollgate_core::access::AccessError;

#[derive(Debug, Error)]
pub enum Error {
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("router operation timed out")]
  Timeout,

  #[error("login rejected: {0}")]
  LoginFailed(String),

  /// The router answered `!trap` — an explicit rejection of the command.
  #[error("command rejected: {0}")]
  Trap(String),

  /// The router answered `!fatal` and is closing the connection.
  #[error("fatal router error: {0}")]
  Fatal(String),

  #[error("malformed reply: {0}")]
  Protocol(String),
}

/// Classify for the engine's retry policy: connection-level failures are
/// retryable, everything the router said on purpose is not.
impl From<Error> for AccessError {
  fn from(err: Error) -> Self {
    match &err {
      Error::Io(_) | Error::Timeout => AccessError::Transient(err.to_string()),
      _ => AccessError::Protocol(err.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
