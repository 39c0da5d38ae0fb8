//! Error types for request delivery.
//!
//! Transport and response errors never surface to SDK callers. The worker
//! turns them into a stopped run and the head request waits for the next
//! tick. Configuration errors are the only ones returned from the queue's
//! public operations besides storage failures.

use std::fmt;

use beacon_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions of the delivery pipeline.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The queue is missing or has invalid configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Network-level failure: DNS, connect, TLS, reading the body or the
    /// upload file.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The request exceeded the configured timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Response status outside 2xx.
    #[error("unexpected status: HTTP {status_code}")]
    BadStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// 2xx response whose body is not a JSON object.
    #[error("unparseable response body: {message}")]
    BadBody {
        /// Parse failure description
        message: String,
    },

    /// 2xx JSON response whose `result` is not "success".
    #[error("endpoint did not acknowledge request: result={result}")]
    NotSuccess {
        /// The `result` value received, empty when absent
        result: String,
    },

    /// The request store failed.
    #[error("storage error: {message}")]
    StorageError {
        /// Storage error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a bad status error from an HTTP response.
    pub fn bad_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::BadStatus { status_code, body: body.into() }
    }

    /// Creates a bad body error.
    pub fn bad_body(message: impl Into<String>) -> Self {
        Self::BadBody { message: message.into() }
    }

    /// Creates a not-acknowledged error.
    pub fn not_success(result: impl Into<String>) -> Self {
        Self::NotSuccess { result: result.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError { message: message.into() }
    }

    /// Determines if a later tick may succeed where this attempt failed.
    ///
    /// Every failure of a send is retried because the request stays at the
    /// head of the log. Only configuration problems need caller action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::BadStatus { .. }
            | Self::BadBody { .. }
            | Self::NotSuccess { .. }
            | Self::StorageError { .. } => true,

            Self::ConfigurationError { .. } => false,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Category of delivery error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity and timeouts.
    Network,
    /// The endpoint answered but did not acknowledge.
    Response,
    /// Request store failures.
    Storage,
    /// Configuration problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::BadStatus { .. }
            | DeliveryError::BadBody { .. }
            | DeliveryError::NotSuccess { .. } => Self::Response,
            DeliveryError::StorageError { .. } => Self::Storage,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Response => write!(f, "response"),
            Self::Storage => write!(f, "storage"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
