//! Recorder state
//!
//! Lifecycle of a single `Recorder`, mirroring the platform recorder states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// Nothing recorded yet, or reset
    #[default]
    Inactive,
    /// Chunks are being collected
    Recording,
    /// Stopped; the artifact is available
    Stopped,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderState::Inactive => write!(f, "inactive"),
            RecorderState::Recording => write!(f, "recording"),
            RecorderState::Stopped => write!(f, "stopped"),
        }
    }
}
