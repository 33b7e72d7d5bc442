//! Capture trait definitions
//!
//! Platform-agnostic traits for capture devices and the feeds behind tracks.

use super::track::MediaTrack;
use crate::frame::Frame;
use crate::utils::error::RecorderResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of signal carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a track's signal comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackOrigin {
    Camera,
    Screen,
    /// Produced by the compositor from other tracks
    Mixed,
}

/// Which device a capture source asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Camera and microphone
    Camera,
    /// Display, with the system audio it exposes
    Screen,
}

impl CaptureKind {
    pub fn origin(&self) -> TrackOrigin {
        match self {
            CaptureKind::Camera => TrackOrigin::Camera,
            CaptureKind::Screen => TrackOrigin::Screen,
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Camera => write!(f, "camera"),
            CaptureKind::Screen => write!(f, "screen"),
        }
    }
}

/// A request for live tracks, as handed to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub kind: CaptureKind,
    pub audio: bool,
    pub video: bool,
}

/// Source of video frames behind a video track
pub trait VideoFeed: Send + Sync {
    /// Native frame size
    fn dimensions(&self) -> (u32, u32);

    /// Frame visible at `at` (time since the feed was acquired)
    fn frame_at(&self, at: Duration) -> Option<Frame>;

    /// Release the device. Called once, when the track is stopped.
    fn stop(&self) {}

    /// Whether the device went away on its own
    fn has_ended(&self) -> bool {
        false
    }
}

/// Source of audio samples behind an audio track
pub trait AudioFeed: Send + Sync {
    /// Fill `out` with mono samples in [-1, 1] starting at `at`, rendered at
    /// `sample_rate`
    fn read(&self, at: Duration, sample_rate: u32, out: &mut [f32]);

    /// Release the device. Called once, when the track is stopped.
    fn stop(&self) {}

    /// Whether the device went away on its own
    fn has_ended(&self) -> bool {
        false
    }
}

/// Platform media-capture entry points
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire live tracks. May prompt for permission or show a picker.
    async fn acquire(&self, request: &CaptureRequest) -> RecorderResult<Vec<MediaTrack>>;

    /// Displays available for screen capture
    fn displays(&self) -> Vec<DisplayInfo>;

    /// Cameras available for capture
    fn cameras(&self) -> Vec<CameraInfo>;
}

/// Information about a display/screen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Unique display ID
    pub id: u32,

    /// Display name
    pub name: String,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Whether this is the primary display
    pub is_primary: bool,

    /// Refresh rate in Hz (if available)
    pub refresh_rate: Option<u32>,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,

    /// Whether the camera also exposes a microphone
    pub has_microphone: bool,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}
