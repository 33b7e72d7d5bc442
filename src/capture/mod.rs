//! Capture sources
//!
//! Camera, microphone and screen acquisition behind the `MediaDevices` seam.

pub mod native;
pub mod source;
pub mod synthetic;
pub mod track;
pub mod traits;

pub use native::NativeDevices;
pub use source::CaptureSource;
pub use synthetic::{Pattern, SyntheticDevices};
pub use track::{MediaTrack, TrackFeed, TrackInfo};
pub use traits::{
    AudioFeed, CameraInfo, CaptureKind, CaptureRequest, DisplayInfo, MediaDevices, Resolution,
    TrackKind, TrackOrigin, VideoFeed,
};

use crate::config::{CaptureBackend, RecorderSettings};
use std::sync::Arc;

/// Capture devices selected by the settings
pub fn devices_for(settings: &RecorderSettings) -> Arc<dyn MediaDevices> {
    match settings.capture.backend {
        CaptureBackend::Native => Arc::new(NativeDevices::new(settings)),
        CaptureBackend::Synthetic => Arc::new(SyntheticDevices::new()),
    }
}
