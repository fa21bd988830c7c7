//! Error types and error handling
//!
//! One taxonomy for the whole broker core, aligned with how the transport
//! layer reports failures: authentication failures, invalid state or policy
//! violations, missing resources, and everything else reported generically.

use thiserror::Error;

use crate::linking::LinkRefusal;
use crate::provider::GatewayError;
use crate::store::StoreError;

/// Broker error type
#[derive(Debug, Error)]
pub enum Error {
    /// Talking to an external identity provider failed
    #[error("provider error: {0}")]
    Provider(#[from] GatewayError),

    /// CSRF state parameter is unknown, expired, or already consumed
    #[error("invalid state parameter")]
    InvalidState,

    /// A provider name the broker has no gateway for
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Authentication failure (bad, expired, or revoked credentials)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Account-linking policy refused the operation
    #[error("{0}")]
    PolicyViolation(LinkRefusal),

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness invariant would be violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}
