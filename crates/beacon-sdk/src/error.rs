//! Error types returned by the SDK surface.

use beacon_core::CoreError;
use beacon_delivery::DeliveryError;
use thiserror::Error;

/// Result type alias using `SdkError`.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors surfaced to SDK callers.
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    /// The controller was halted or never finished initialising.
    #[error("SDK is not initialized")]
    NotInitialized,

    /// Caller supplied invalid arguments.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Foreground exit without a matching enter.
    #[error("foreground exit called without a matching enter")]
    UnbalancedSession,

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] CoreError),

    /// The delivery queue rejected the operation.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl SdkError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<figment::Error> for SdkError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
