//! Error types for the DCTP transport.

use thiserror::Error;

/// Result type alias for DCTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during DCTP operations.
///
/// Wire-level pathology ([`Error::Malformed`]) is absorbed inside the poll
/// loop and counted; callers only ever observe the other variants.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not legal in the current transport state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Received frame failed structural or checksum validation
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Drain deadline exceeded
    #[error("drain timed out after {0}ms with segments still in flight")]
    Timeout(u64),
}

impl Error {
    /// Create a new invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a new malformed-packet error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    /// True for errors the poll loop absorbs rather than propagates
    pub fn is_wire_level(&self) -> bool {
        matches!(self, Error::Malformed(_))
    }
}
