//! Error types for Pixl Player Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unrecoverable engine fault. Once observed the controller is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalStreamFault {
    /// Engine detail code, e.g. `manifestLoadError`
    pub details: String,
    /// Human readable description
    pub message: String,
}

impl FatalStreamFault {
    pub fn new(details: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FatalStreamFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.details, self.message)
    }
}

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Cue document errors
    #[error("Invalid cue on line {line}: {reason}")]
    CueParse { line: usize, reason: String },

    // Attachment errors
    #[error("Stream adapter is already attached")]
    AlreadyAttached,

    #[error("Stream adapter is not attached")]
    NotAttached,

    #[error("Player session has been torn down")]
    SessionClosed,

    // Stream faults
    #[error("Fatal stream fault: {0}")]
    FatalStream(FatalStreamFault),

    #[error("Unknown quality level: {index}")]
    UnknownLevel { index: usize },

    // Command errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Telemetry errors
    #[error("Telemetry delivery failed: {0}")]
    TelemetryDelivery(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a cue parse error
    pub fn cue(line: usize, reason: impl Into<String>) -> Self {
        Error::CueParse {
            line,
            reason: reason.into(),
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CueParse { .. }
                | Error::TelemetryDelivery(_)
                | Error::Network(_)
        )
    }

    /// Returns true if this error must reach the user-facing layer.
    ///
    /// Everything else is absorbed inside the core.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Error::FatalStream(_)
                | Error::AlreadyAttached
                | Error::NotAttached
                | Error::SessionClosed
        )
    }

    /// Returns the error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::CueParse { .. } => "CUE_PARSE",
            Error::AlreadyAttached => "ALREADY_ATTACHED",
            Error::NotAttached => "NOT_ATTACHED",
            Error::SessionClosed => "SESSION_CLOSED",
            Error::FatalStream(_) => "FATAL_STREAM",
            Error::UnknownLevel { .. } => "UNKNOWN_LEVEL",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::TelemetryDelivery(_) => "TELEMETRY_DELIVERY",
            Error::Network(_) => "NETWORK",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}
