//! Error type for `tollgate-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tollgate_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown enum encoding: {0}")]
  Encoding(String),

  /// UNIQUE(source, source_ref) backstop fired — the activation path should
  /// have deduplicated before inserting.
  #[error("entitlement for source ref {0:?} already exists")]
  DuplicateSourceRef(String),

  #[error("entitlement not found: {0}")]
  EntitlementNotFound(uuid::Uuid),

  #[error("checkout not found: {0:?}")]
  CheckoutNotFound(String),

  #[error("voucher code {0:?} already exists")]
  DuplicateVoucher(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
