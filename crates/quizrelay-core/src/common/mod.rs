//! Shared types and error definitions used across the relay and its hosts.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type returned by every relay operation.
//! - [`types`] - Identities, families, channels and backbone positions.
//! - [`wire`] - Versioned payload schema exchanged with generation workers.

pub mod error;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
