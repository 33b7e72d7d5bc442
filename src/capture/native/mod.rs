//! Capture devices of this machine
//!
//! Screens are grabbed through FFmpeg. Cameras (nokhwa) and microphones
//! (cpal) need the `native-capture` feature, which links the platform's
//! camera and audio libraries.

#[cfg(feature = "native-capture")]
mod camera;
#[cfg(feature = "native-capture")]
mod microphone;
mod samples;
mod screen;

pub use samples::SampleQueue;
pub use screen::ScreenFeed;

use super::track::MediaTrack;
use super::traits::{
    CameraInfo, CaptureKind, CaptureRequest, DisplayInfo, MediaDevices, TrackOrigin,
};
use crate::config::RecorderSettings;
use crate::encoder::ffmpeg;
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Map a device failure to a permission refusal or a missing device
fn classify(device: &str, message: String) -> RecorderError {
    let lower = message.to_lowercase();
    let refused = ["permission", "denied", "not authorized", "not permitted"]
        .iter()
        .any(|word| lower.contains(word));
    if refused {
        RecorderError::PermissionDenied(format!("{}: {}", device, message))
    } else {
        RecorderError::DeviceUnavailable(format!("{}: {}", device, message))
    }
}

/// `MediaDevices` backed by real hardware
pub struct NativeDevices {
    camera: Option<String>,
    ffmpeg_path: String,
    screen_width: u32,
    screen_height: u32,
    screen_frame_rate: u32,
}

impl NativeDevices {
    pub fn new(settings: &RecorderSettings) -> Self {
        Self {
            camera: settings.capture.camera.clone(),
            ffmpeg_path: settings.encoder.ffmpeg_path.clone(),
            screen_width: settings.compositor.canvas_width,
            screen_height: settings.compositor.canvas_height,
            screen_frame_rate: settings.capture.screen_frame_rate,
        }
    }

    #[cfg(feature = "native-capture")]
    async fn acquire_camera(&self, request: &CaptureRequest) -> RecorderResult<Vec<MediaTrack>> {
        let mut tracks = Vec::new();
        if request.video {
            let feed = camera::CameraFeed::open(camera::camera_index(self.camera.as_deref())).await?;
            let label = feed.name().to_string();
            tracks.push(MediaTrack::video(label, TrackOrigin::Camera, Arc::new(feed)));
        }
        if request.audio {
            match microphone::MicrophoneFeed::open().await {
                Ok(feed) => {
                    let label = feed.name().to_string();
                    tracks.push(MediaTrack::audio(label, TrackOrigin::Camera, Arc::new(feed)));
                }
                Err(e) => {
                    for track in &tracks {
                        track.stop();
                    }
                    return Err(e);
                }
            }
        }
        Ok(tracks)
    }

    #[cfg(not(feature = "native-capture"))]
    async fn acquire_camera(&self, _request: &CaptureRequest) -> RecorderResult<Vec<MediaTrack>> {
        Err(RecorderError::DeviceUnavailable(format!(
            "camera {} needs the `native-capture` feature",
            self.camera.as_deref().unwrap_or("0")
        )))
    }

    async fn acquire_screen(&self, request: &CaptureRequest) -> RecorderResult<Vec<MediaTrack>> {
        if !request.video {
            return Err(RecorderError::DeviceUnavailable(
                "system audio capture is not supported".to_string(),
            ));
        }
        let feed = ScreenFeed::open(
            &self.ffmpeg_path,
            self.screen_width,
            self.screen_height,
            self.screen_frame_rate,
        )
        .await?;
        // System audio is not captured; the screen comes without an audio track
        Ok(vec![MediaTrack::video("screen", TrackOrigin::Screen, Arc::new(feed))])
    }
}

#[async_trait]
impl MediaDevices for NativeDevices {
    async fn acquire(&self, request: &CaptureRequest) -> RecorderResult<Vec<MediaTrack>> {
        tracing::info!("Acquiring native {} devices", request.kind);
        match request.kind {
            CaptureKind::Camera => self.acquire_camera(request).await,
            CaptureKind::Screen => self.acquire_screen(request).await,
        }
    }

    fn displays(&self) -> Vec<DisplayInfo> {
        if !ffmpeg::is_available(&self.ffmpeg_path) {
            tracing::warn!("FFmpeg not found at {:?}, no screen to capture", self.ffmpeg_path);
            return Vec::new();
        }
        vec![DisplayInfo {
            id: 0,
            name: "Primary display".to_string(),
            width: self.screen_width,
            height: self.screen_height,
            is_primary: true,
            refresh_rate: Some(self.screen_frame_rate),
        }]
    }

    #[cfg(feature = "native-capture")]
    fn cameras(&self) -> Vec<CameraInfo> {
        camera::list_cameras(microphone::has_microphone())
    }

    #[cfg(not(feature = "native-capture"))]
    fn cameras(&self) -> Vec<CameraInfo> {
        Vec::new()
    }
}
