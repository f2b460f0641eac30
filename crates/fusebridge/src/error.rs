//! Error types for the embedding layer.

use std::fmt;

use arrow::error::ArrowError;
use fusebridge_native as native;
use thiserror::Error;

/// Kind of a native failure, decoded from the `kind` field of the error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The engine caught a panic. Its state should be treated with suspicion.
    Panic,
    /// A pointer, string, handle or options blob was rejected.
    InvalidArgument,
    /// The execution runtime could not be started.
    RuntimeInitializationFailed,
    /// The execution runtime did not stop in time, or was already gone.
    RuntimeShutdownFailed,
    /// Registering or deregistering a table failed.
    TableRegistrationFailed,
    /// Planning a SQL statement failed.
    SqlError,
    /// Executing, exporting or writing a result failed.
    DataFrameError,
    /// A discriminant this version does not know.
    Unknown(u32),
}

impl ErrorKind {
    /// Decode a raw discriminant.
    ///
    /// Returns `None` for the success discriminant.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            native::FB_OK => return None,
            native::FB_ERR_PANIC => Self::Panic,
            native::FB_ERR_INVALID_ARGUMENT => Self::InvalidArgument,
            native::FB_ERR_RUNTIME_INIT => Self::RuntimeInitializationFailed,
            native::FB_ERR_RUNTIME_SHUTDOWN => Self::RuntimeShutdownFailed,
            native::FB_ERR_TABLE_REGISTRATION => Self::TableRegistrationFailed,
            native::FB_ERR_SQL => Self::SqlError,
            native::FB_ERR_DATA_FRAME => Self::DataFrameError,
            other => Self::Unknown(other),
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic => f.write_str("panic"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::RuntimeInitializationFailed => f.write_str("runtime initialization failed"),
            Self::RuntimeShutdownFailed => f.write_str("runtime shutdown failed"),
            Self::TableRegistrationFailed => f.write_str("table registration failed"),
            Self::SqlError => f.write_str("sql error"),
            Self::DataFrameError => f.write_str("data frame error"),
            Self::Unknown(raw) => write!(f, "unknown error kind {raw}"),
        }
    }
}

/// Errors surfaced to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller passed an argument that was rejected before any native call.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The engine refused the call synchronously; nothing was started.
    #[error("{operation} rejected: {kind}")]
    Rejected {
        /// Kind returned as the call status.
        kind: ErrorKind,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// The engine reported a failure through the completion callback.
    #[error("{kind}: {message}")]
    Native {
        /// Decoded kind.
        kind: ErrorKind,
        /// Message copied out of the payload.
        message: String,
    },

    /// A successful result could not be imported.
    #[error("failed to import native result: {0}")]
    Import(#[from] ArrowError),

    /// The operation was removed before it produced an outcome.
    #[error("operation abandoned before completion")]
    Abandoned,
}

impl Error {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Native kind associated with this error, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Argument(_) => Some(ErrorKind::InvalidArgument),
            Self::Rejected { kind, .. } | Self::Native { kind, .. } => Some(*kind),
            Self::Import(_) | Self::Abandoned => None,
        }
    }

    /// Whether the engine panicked.
    ///
    /// Callers should stop issuing work against the affected runtime rather
    /// than retry.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.kind() == Some(ErrorKind::Panic)
    }

    /// Message carried by a native failure, or the display text otherwise.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Native { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type for the embedding layer.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_raw() {
        assert_eq!(ErrorKind::from_raw(0), None);
        assert_eq!(ErrorKind::from_raw(1), Some(ErrorKind::Panic));
        assert_eq!(ErrorKind::from_raw(2), Some(ErrorKind::InvalidArgument));
        assert_eq!(ErrorKind::from_raw(3), Some(ErrorKind::RuntimeInitializationFailed));
        assert_eq!(ErrorKind::from_raw(4), Some(ErrorKind::RuntimeShutdownFailed));
        assert_eq!(ErrorKind::from_raw(5), Some(ErrorKind::TableRegistrationFailed));
        assert_eq!(ErrorKind::from_raw(6), Some(ErrorKind::SqlError));
        assert_eq!(ErrorKind::from_raw(7), Some(ErrorKind::DataFrameError));
        assert_eq!(ErrorKind::from_raw(99), Some(ErrorKind::Unknown(99)));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::argument("x").kind(), Some(ErrorKind::InvalidArgument));
        assert_eq!(Error::Abandoned.kind(), None);

        let panic = Error::Native {
            kind: ErrorKind::Panic,
            message: "boom".into(),
        };
        assert!(panic.is_panic());
        assert_eq!(panic.message(), "boom");
        assert_eq!(panic.to_string(), "panic: boom");

        let rejected = Error::Rejected {
            kind: ErrorKind::InvalidArgument,
            operation: "count",
        };
        assert!(!rejected.is_panic());
        assert_eq!(rejected.to_string(), "count rejected: invalid argument");
    }
}
