//! Error types for expwatch core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for expwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for expwatch.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistent store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote table error
    #[error("Remote table error: {0}")]
    Remote(#[from] RemoteError),

    /// Invocation lease error
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Persistent key-value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key contains characters the backend cannot represent
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Stored value failed its integrity check
    #[error("Checksum mismatch for key '{key}': expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        key: String,
        expected: u32,
        actual: u32,
    },

    /// Stored value is shorter than its header
    #[error("Truncated value for key '{0}'")]
    Truncated(String),

    /// Backend read failed
    #[error("Read failed for key '{key}': {message}")]
    ReadFailed { key: String, message: String },

    /// Backend write failed
    #[error("Write failed for key '{key}': {message}")]
    WriteFailed { key: String, message: String },

    /// Blocking IO task panicked or was cancelled
    #[error("Store task for key '{key}' did not complete: {message}")]
    TaskFailed { key: String, message: String },
}

/// Remote table client errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("Request to {endpoint} failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    /// Non-success HTTP status
    #[error("Unexpected HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// GraphQL-level errors in an otherwise successful response
    #[error("Query returned errors: {0}")]
    QueryErrors(String),

    /// Response could not be decoded into the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Page claims more results but carries no continuation token
    #[error("Page reported hasNextPage without an end cursor")]
    MissingCursor,

    /// Circuit breaker is open
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),
}

/// Invocation lease errors.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// Another invocation holds a live lease
    #[error("Lease held by {holder} until {expires_at_ms}")]
    Held { holder: String, expires_at_ms: i64 },

    /// Compare-and-swap lost against a concurrent writer
    #[error("Lease acquisition lost a concurrent race")]
    Contended,
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Whether this error came from the persistent store.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Io(_))
    }

    /// Whether a stored value exists but cannot be decoded.
    pub fn is_corrupt_value(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::ChecksumMismatch { .. } | StoreError::Truncated(_))
                | Error::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let remote = RemoteError::RequestFailed {
            endpoint: "http://localhost:9000/graphql".into(),
            message: "connection refused".into(),
        };
        let err: Error = remote.into();
        assert!(err.to_string().contains("Request to http://localhost:9000/graphql failed"));
    }

    #[test]
    fn test_checksum_error_is_hex() {
        let err = StoreError::ChecksumMismatch {
            key: "expwatch/state".into(),
            expected: 0xdead_beef,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch for key 'expwatch/state': expected deadbeef, got 00000001"
        );
    }

    #[test]
    fn test_lease_error() {
        let err = Error::from(LeaseError::Held {
            holder: "abc".into(),
            expires_at_ms: 42,
        });
        assert!(err.to_string().contains("Lease held by abc"));
        assert!(!err.is_store());
    }

    #[test]
    fn test_is_store() {
        let err = Error::from(StoreError::Truncated("k".into()));
        assert!(err.is_store());
    }

    #[test]
    fn test_is_corrupt_value() {
        assert!(Error::from(StoreError::Truncated("k".into())).is_corrupt_value());
        assert!(Error::Serialization("eof".into()).is_corrupt_value());

        let io = Error::from(StoreError::ReadFailed {
            key: "k".into(),
            message: "permission denied".into(),
        });
        assert!(!io.is_corrupt_value());
    }
}
