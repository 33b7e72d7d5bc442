//! Session state
//!
//! Defines the session state machine states, the events it broadcasts and
//! the snapshot handed to the presentation layer.

use crate::capture::TrackInfo;
use crate::config::RecordingMode;
use crate::recorder::ArtifactInfo;
use crate::utils::error::ErrorResponse;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing acquired yet, or shut down
    #[default]
    Idle,
    /// Capture was turned off by the user
    CameraOff,
    /// Capture is live and ready to record
    CameraOn,
    /// Recording in progress
    Recording,
    /// Recording stopped, artifact available for playback
    Previewing,
}

impl SessionState {
    /// Whether no capture is held in this state
    pub fn is_inactive(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::CameraOff)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::CameraOff => "cameraoff",
            SessionState::CameraOn => "cameraon",
            SessionState::Recording => "recording",
            SessionState::Previewing => "previewing",
        };
        f.write_str(name)
    }
}

/// Events emitted by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    /// Whole seconds recorded so far
    Elapsed { seconds: u64 },
    ArtifactReady { artifact: ArtifactInfo },
    Error { error: ErrorResponse },
}

/// Which actions the presentation layer may offer
///
/// At most one of `start` and `stop` is ever enabled, which is what keeps two
/// recordings from being started at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affordances {
    pub camera_on: bool,
    pub camera_off: bool,
    pub start: bool,
    pub stop: bool,
    pub download: bool,
    pub reset: bool,
    /// Mode checkboxes
    pub change_mode: bool,
}

impl Affordances {
    pub fn for_state(state: SessionState, capture_live: bool, has_artifact: bool) -> Self {
        Self {
            camera_on: state.is_inactive(),
            camera_off: matches!(state, SessionState::CameraOn | SessionState::Recording)
                || (state == SessionState::Previewing && capture_live),
            start: state == SessionState::CameraOn,
            stop: state == SessionState::Recording,
            download: has_artifact && state != SessionState::Recording,
            reset: state == SessionState::Previewing,
            change_mode: state != SessionState::Recording,
        }
    }
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub mode: RecordingMode,
    pub elapsed_seconds: u64,
    /// Elapsed time as shown next to the record button
    pub elapsed: String,
    pub artifact: Option<ArtifactInfo>,
    pub tracks: Vec<TrackInfo>,
    pub affordances: Affordances,
    pub last_error: Option<ErrorResponse>,
}
