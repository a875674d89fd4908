//! MikroTik RouterOS backend for the Tollgate access controller.
//!
//! Speaks the RouterOS binary API (length-prefixed words over TCP, port
//! 8728) and manages hotspot IP-binding entries. Implements
//! [`tollgate_core::access::AccessController`]; any other router vendor
//! substitutes behind the same trait.

mod client;

pub mod error;
pub mod proto;

pub use client::{RouterOsClient, RouterOsConfig};
pub use error::{Error, Result};
