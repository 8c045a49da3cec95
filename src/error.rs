//! Error handling for Sonolith
//!
//! Three failure families cover the whole core: bad calibration or device
//! parameters, operations attempted in the wrong lifecycle state, and
//! device open/negotiation failures. None of them are retried internally.

use thiserror::Error;

/// Result type alias for Sonolith operations
pub type Result<T> = std::result::Result<T, SonolithError>;

/// Main error type for Sonolith operations
#[derive(Error, Debug)]
pub enum SonolithError {
    /// Invalid or missing calibration / device parameters
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Operation attempted in a state that no longer (or does not yet) allows it
    #[error("Lifecycle error: {reason}")]
    Lifecycle { reason: String },

    /// Audio device open or format negotiation failure
    #[error("Device error: {reason}")]
    Device {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SonolithError {
    /// Shorthand for a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        SonolithError::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for a lifecycle error
    pub fn lifecycle(reason: impl Into<String>) -> Self {
        SonolithError::Lifecycle {
            reason: reason.into(),
        }
    }

    /// Shorthand for a device error without an underlying cause
    pub fn device(reason: impl Into<String>) -> Self {
        SonolithError::Device {
            reason: reason.into(),
            source: None,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SonolithError::Configuration { .. } => "CONFIGURATION_ERROR",
            SonolithError::Lifecycle { .. } => "LIFECYCLE_ERROR",
            SonolithError::Device { .. } => "DEVICE_ERROR",
            SonolithError::Io(_) => "IO_ERROR",
        }
    }

    /// True for errors the caller can fix by changing inputs and trying again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SonolithError::Configuration { .. } | SonolithError::Device { .. }
        )
    }
}
