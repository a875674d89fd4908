//! Core types and trait definitions for the Tollgate hotspot engine.
//!
//! This crate is deliberately free of HTTP, database, and wire-protocol
//! dependencies. It defines the entitlement data model and the two seams the
//! rest of the workspace plugs into: [`store::EntitlementStore`] (durable
//! state) and [`access::AccessController`] (the external router).

pub mod access;
pub mod audit;
pub mod device;
pub mod entitlement;
pub mod error;
pub mod source;
pub mod store;

pub use error::{Error, Result};
