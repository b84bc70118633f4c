//! Error types for the shardwriter core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Transport failures carry an explicit [`ErrorKind`] so the range clients can
//! decide between failing over and giving up without inspecting messages.

use crate::ring::PartitionRange;
use crate::transport::Endpoint;
use std::fmt;
use thiserror::Error;

/// Result type alias for shardwriter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for shardwriter.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid settings or key layout)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A key column required by the table's partition key is missing
    #[error("Missing key column: {0}")]
    MissingKeyColumn(String),

    /// A key component cannot be encoded
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The ring lookup could not place a key
    #[error("Ring lookup error: {0}")]
    Ring(String),

    /// Transport error outside of a range client (e.g. key layout discovery)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A single shard reached its terminal state
    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    /// One or more shards failed, reported at close
    #[error("Close failed: {0}")]
    Close(#[from] CloseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The router was already closed
    #[error("Write router is closed")]
    Closed,
}

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection or transport level failure; another replica may succeed
    Transient,
    /// Malformed statement, validation or authorization failure
    NonRetryable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::NonRetryable => write!(f, "non-retryable"),
        }
    }
}

/// Failure reported by a connection factory or a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failure: {message}")]
pub struct TransportError {
    /// Whether a different endpoint may succeed
    pub kind: ErrorKind,
    /// Human readable detail
    pub message: String,
}

impl TransportError {
    /// Create a transient (retry elsewhere) error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Create a non-retryable error.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    /// Whether failing over to another candidate makes sense.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Terminal failure of one range client.
#[derive(Error, Debug, Clone)]
pub enum ShardError {
    /// Every candidate endpoint failed with a transient error
    #[error("All {attempted} candidate endpoints failed for range {range}: {source}")]
    Exhausted {
        range: PartitionRange,
        attempted: usize,
        #[source]
        source: TransportError,
    },

    /// A candidate rejected the request; other candidates were not tried
    #[error("Request rejected by {endpoint} for range {range}: {source}")]
    Rejected {
        range: PartitionRange,
        endpoint: Endpoint,
        #[source]
        source: TransportError,
    },

    /// The worker task ended abnormally
    #[error("Worker for range {range} aborted: {message}")]
    Aborted {
        range: PartitionRange,
        message: String,
    },
}

impl ShardError {
    /// The range whose client failed.
    pub fn range(&self) -> &PartitionRange {
        match self {
            ShardError::Exhausted { range, .. }
            | ShardError::Rejected { range, .. }
            | ShardError::Aborted { range, .. } => range,
        }
    }
}

/// First shard failure observed while closing a router.
#[derive(Error, Debug, Clone)]
#[error("{failed} of {total} range clients failed; first failure: {first}")]
pub struct CloseError {
    /// First failure in shutdown order
    #[source]
    pub first: ShardError,
    /// Number of failed clients
    pub failed: usize,
    /// Number of clients that were closed
    pub total: usize,
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Token;

    fn range() -> PartitionRange {
        PartitionRange::new(Token(0), Token(100))
    }

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let err: Error = TransportError::transient("connection refused").into();
        assert_eq!(
            err.to_string(),
            "Transport error: transient failure: connection refused"
        );
    }

    #[test]
    fn test_transport_error_kind() {
        assert!(TransportError::transient("timeout").is_retryable());
        assert!(!TransportError::non_retryable("bad credentials").is_retryable());
    }

    #[test]
    fn test_shard_error_display() {
        let err = ShardError::Exhausted {
            range: range(),
            attempted: 2,
            source: TransportError::transient("refused"),
        };
        assert!(err.to_string().contains("All 2 candidate endpoints failed"));
        assert!(err.to_string().contains("(0, 100]"));
        assert_eq!(err.range(), &range());

        let err = ShardError::Rejected {
            range: range(),
            endpoint: Endpoint::new("10.0.0.1", 9160),
            source: TransportError::non_retryable("syntax error"),
        };
        assert!(err.to_string().contains("rejected by 10.0.0.1:9160"));
    }

    #[test]
    fn test_close_error_keeps_source() {
        use std::error::Error as _;

        let err = CloseError {
            first: ShardError::Aborted {
                range: range(),
                message: "panicked".into(),
            },
            failed: 1,
            total: 3,
        };
        assert!(err.to_string().starts_with("1 of 3 range clients failed"));
        assert!(err.source().is_some());
    }
}
