//! Error types for the correlation layer.
//!
//! This module defines the central `Error` enum shared by the relay library
//! and its hosts. The surrounding HTTP layer maps each case to a status code
//! through [`Error::code`] and decides retry policy through
//! [`Error::is_transient`]; nothing inside the relay retries on its own.
//!
//! ## Error Cases
//! - `DuplicateRequest`: the client already has a request in flight.
//! - `Serialization`: a payload could not be encoded or decoded.
//! - `BackboneUnavailable`: a publish or commit-position query failed or timed
//!   out.
//! - `StoreUnavailable`: the key-value store round trip failed.
//! - `InvalidConfig`: the relay was configured with impossible values.
//! - `ServiceShutdown`: a request arrived after the relay stopped.
//!
//! "Not ready yet" is not an error: polling operations return `Ok(None)`.

use crate::common::types::Family;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the correlation layer.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A previous request from the same client has not expired yet.
    #[error("Duplicate {family} request from {identity}")]
    DuplicateRequest { identity: String, family: Family },

    /// The payload could not be encoded to, or decoded from, the wire schema.
    #[error("Serialization failure: {reason}")]
    Serialization { reason: String },

    /// The backbone did not acknowledge a publish or answer an admin query.
    #[error("Backbone unavailable: {context}")]
    BackboneUnavailable { context: String },

    /// The key-value store backing locks and channel assignments failed.
    #[error("Key-value store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// Configuration rejected during startup validation.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The relay is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Stable machine-readable code for this error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Serialization { .. } => "E102",
            Self::DuplicateRequest { .. } => "E105",
            Self::BackboneUnavailable { .. } => "E110",
            Self::StoreUnavailable { .. } => "E111",
            Self::InvalidConfig { .. } => "E112",
            Self::ServiceShutdown => "E113",
        }
    }

    /// Whether the caller may retry the whole operation from scratch.
    ///
    /// Dispatch is not idempotent: a retried dispatch counts as a new request.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackboneUnavailable { .. } | Self::StoreUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}
