//! Error types for connection and handle operations.
//!
//! Every remote call surfaces one of these classified failures. Callers
//! decide on retries; nothing in this crate retries internally.

use thiserror::Error;

/// Errors that can occur during connection and handle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VirtError {
    /// The connection URI could not be resolved or was rejected by the daemon.
    #[error("Invalid connection URI: {0}")]
    InvalidUri(String),

    /// Empty descriptor, empty lookup key, or unrecognized flag/enum value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Mutating operation attempted through a read-only connection.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Lookup found no matching object.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not available in the current connection scope.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Operation incompatible with the handle's lifecycle state.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    /// The daemon call failed for reasons opaque to this layer.
    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

/// Classification of a [`VirtError`] without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidUri,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    Unsupported,
    InvalidState,
    TransportFailure,
}

impl VirtError {
    /// Get the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUri(_) => ErrorKind::InvalidUri,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::TransportFailure(_) => ErrorKind::TransportFailure,
        }
    }

    /// True for the expected negative result of a lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when repeating the same call on the same connection cannot succeed.
    ///
    /// Only transport failures are worth retrying, and only by the caller.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::TransportFailure(_))
    }

    pub(crate) fn connection_closed() -> Self {
        Self::InvalidState("connection is closed".to_string())
    }

    pub(crate) fn read_only(op: &str) -> Self {
        Self::PermissionDenied(format!("{} is not allowed on a read-only connection", op))
    }
}

/// Result type alias for connection and handle operations.
pub type Result<T> = std::result::Result<T, VirtError>;
