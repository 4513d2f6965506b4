//! Error types for the sync engine.

use bujo_sync_protocol::{DecodeError, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No user is signed in, or the remote rejected the credentials.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The device has no connectivity.
    #[error("not connected to the remote")]
    NotConnected,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A local record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A pulled row did not match its expected shape.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The local store failed.
    #[error("store error: {0}")]
    Store(String),

    /// The cycle was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Failure injected by the sync policy.
    #[error("forced failure: {0}")]
    Forced(String),

    /// Invalid status transition.
    #[error("invalid status transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps an HTTP error status to an error.
    ///
    /// 401 and 403 mean the session is gone. 408, 429 and 5xx are
    /// transient; every other status is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::NotAuthenticated,
            408 | 429 | 500..=599 => Self::Server {
                status,
                message: message.into(),
                retryable: true,
            },
            _ => Self::Server {
                status,
                message: message.into(),
                retryable: false,
            },
        }
    }

    /// Returns true if the failure is expected to clear on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } | SyncError::Server { retryable, .. } => {
                *retryable
            }
            SyncError::NotConnected | SyncError::Forced(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return SyncError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return SyncError::Serialization(err.to_string());
        }
        if err.is_builder() {
            return SyncError::transport_fatal(err.to_string());
        }
        // Connect, timeout and body errors.
        SyncError::transport_retryable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad url").is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(SyncError::Forced("debug".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::NotAuthenticated.is_retryable());
        assert!(!SyncError::Serialization("x".into()).is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            SyncError::from_status(401, "expired"),
            SyncError::NotAuthenticated
        ));
        assert!(matches!(
            SyncError::from_status(403, "rls"),
            SyncError::NotAuthenticated
        ));
        assert!(SyncError::from_status(408, "timeout").is_retryable());
        assert!(SyncError::from_status(429, "slow down").is_retryable());
        assert!(SyncError::from_status(503, "unavailable").is_retryable());
        assert!(!SyncError::from_status(409, "conflict").is_retryable());
        assert!(!SyncError::from_status(400, "bad request").is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to the remote");

        let err = SyncError::Server {
            status: 502,
            message: "bad gateway".into(),
            retryable: true,
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }
}
