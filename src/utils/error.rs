//! Error types and handling
//!
//! Common error types used across the recorder. Every variant is recoverable:
//! a failing action leaves the session in the state it was in before.

use crate::session::state::SessionState;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("No video source to compose")]
    NoVideoSource,

    #[error("Stream has no active tracks")]
    NoActiveStream,

    #[error("Encoding failed: {0}")]
    EncodingFailure(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("No recording available")]
    NoArtifact,

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("Compositor was stopped and cannot be restarted")]
    CompositorStopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    /// Stable code used by the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::PermissionDenied(_) => "PERMISSION_DENIED",
            RecorderError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            RecorderError::NoVideoSource => "NO_VIDEO_SOURCE",
            RecorderError::NoActiveStream => "NO_ACTIVE_STREAM",
            RecorderError::EncodingFailure(_) => "ENCODING_FAILURE",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::NoArtifact => "NO_ARTIFACT",
            RecorderError::InvalidTransition { .. } => "INVALID_TRANSITION",
            RecorderError::CompositorStopped => "COMPOSITOR_STOPPED",
            RecorderError::InvalidConfig(_) => "INVALID_CONFIG",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error came from acquiring a capture device
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            RecorderError::PermissionDenied(_) | RecorderError::DeviceUnavailable(_)
        )
    }
}

/// Error response for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<&RecorderError> for ErrorResponse {
    fn from(error: &RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(RecorderError::PermissionDenied("camera".into()));
        assert_eq!(response.code, "PERMISSION_DENIED");
        assert_eq!(response.message, "Permission denied: camera");

        let response = ErrorResponse::from(RecorderError::InvalidTransition {
            action: "start recording",
            state: SessionState::Idle,
        });
        assert_eq!(response.code, "INVALID_TRANSITION");
        assert_eq!(response.message, "Cannot start recording while idle");
    }

    #[test]
    fn test_acquisition_failures() {
        assert!(RecorderError::DeviceUnavailable("screen".into()).is_acquisition_failure());
        assert!(!RecorderError::NoVideoSource.is_acquisition_failure());
    }
}
