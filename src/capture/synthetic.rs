//! In-process capture devices
//!
//! `SyntheticDevices` stands in for real hardware: cameras produce a test
//! pattern, microphones a sine tone. Each device can be made to refuse
//! permission or to be missing, which is how acquisition failures are
//! exercised.

use super::track::MediaTrack;
use super::traits::{
    AudioFeed, CameraInfo, CaptureKind, CaptureRequest, DisplayInfo, MediaDevices, Resolution,
    TrackOrigin, VideoFeed,
};
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BAR_COLORS: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 255, 255],
    [0, 255, 0, 255],
    [255, 0, 255, 255],
    [255, 0, 0, 255],
    [0, 0, 255, 255],
    [0, 0, 0, 255],
];

/// Picture produced by a synthetic video feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Solid([u8; 4]),
    /// Eight vertical color bars
    Bars,
}

/// Video feed rendering a static pattern
#[derive(Debug, Clone)]
pub struct PatternFeed {
    frame: Frame,
}

impl PatternFeed {
    pub fn new(width: u32, height: u32, pattern: Pattern) -> Self {
        let frame = match pattern {
            Pattern::Solid(rgba) => Frame::solid(width, height, rgba),
            Pattern::Bars => {
                let mut frame = Frame::new(width, height);
                let bar_width = (width / BAR_COLORS.len() as u32).max(1);
                for (i, color) in BAR_COLORS.iter().enumerate() {
                    let x = i as u32 * bar_width;
                    let w = if i == BAR_COLORS.len() - 1 {
                        width.saturating_sub(x)
                    } else {
                        bar_width
                    };
                    frame.fill_rect(x, 0, w, height, *color);
                }
                frame
            }
        };
        Self { frame }
    }
}

impl VideoFeed for PatternFeed {
    fn dimensions(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    fn frame_at(&self, _at: Duration) -> Option<Frame> {
        Some(self.frame.clone())
    }
}

/// Audio feed producing a sine tone
#[derive(Debug, Clone, Copy)]
pub struct ToneFeed {
    frequency: f64,
    amplitude: f32,
}

impl ToneFeed {
    pub fn new(frequency: f64, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
        }
    }
}

impl AudioFeed for ToneFeed {
    fn read(&self, at: Duration, sample_rate: u32, out: &mut [f32]) {
        let start = at.as_secs_f64();
        let step = 1.0 / sample_rate.max(1) as f64;
        for (i, sample) in out.iter_mut().enumerate() {
            let t = start + i as f64 * step;
            *sample = self.amplitude * (TAU * self.frequency * t).sin() as f32;
        }
    }
}

/// Availability of a synthetic device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAccess {
    Granted,
    Denied,
    Missing,
}

#[derive(Debug, Clone)]
struct DeviceProfile {
    width: u32,
    height: u32,
    pattern: Pattern,
    audio: bool,
    access: DeviceAccess,
}

/// Deterministic `MediaDevices` implementation
pub struct SyntheticDevices {
    camera: DeviceProfile,
    screen: DeviceProfile,
    acquisitions: AtomicUsize,
    issued: AtomicUsize,
    /// Handed-out tracks, pruned of ended ones on every acquisition
    outstanding: Mutex<Vec<MediaTrack>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self {
            camera: DeviceProfile {
                width: 640,
                height: 360,
                pattern: Pattern::Solid([0, 160, 0, 255]),
                audio: true,
                access: DeviceAccess::Granted,
            },
            screen: DeviceProfile {
                width: 1280,
                height: 720,
                pattern: Pattern::Bars,
                audio: true,
                access: DeviceAccess::Granted,
            },
            acquisitions: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            outstanding: Mutex::new(Vec::new()),
        }
    }

    fn profile_mut(&mut self, kind: CaptureKind) -> &mut DeviceProfile {
        match kind {
            CaptureKind::Camera => &mut self.camera,
            CaptureKind::Screen => &mut self.screen,
        }
    }

    fn profile(&self, kind: CaptureKind) -> &DeviceProfile {
        match kind {
            CaptureKind::Camera => &self.camera,
            CaptureKind::Screen => &self.screen,
        }
    }

    /// Refuse permission for a device
    pub fn deny(mut self, kind: CaptureKind) -> Self {
        self.profile_mut(kind).access = DeviceAccess::Denied;
        self
    }

    /// Pretend a device is not connected
    pub fn missing(mut self, kind: CaptureKind) -> Self {
        self.profile_mut(kind).access = DeviceAccess::Missing;
        self
    }

    pub fn with_size(mut self, kind: CaptureKind, width: u32, height: u32) -> Self {
        let profile = self.profile_mut(kind);
        profile.width = width;
        profile.height = height;
        self
    }

    pub fn with_pattern(mut self, kind: CaptureKind, pattern: Pattern) -> Self {
        self.profile_mut(kind).pattern = pattern;
        self
    }

    /// Remove the microphone (camera) or the system audio (screen)
    pub fn without_audio(mut self, kind: CaptureKind) -> Self {
        self.profile_mut(kind).audio = false;
        self
    }

    /// Number of acquisition attempts, successful or not
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of tracks handed out so far
    pub fn issued_tracks(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Number of handed-out tracks that are still live
    pub fn live_tracks(&self) -> usize {
        self.outstanding.lock().iter().filter(|t| t.is_live()).count()
    }

    /// The frame a device's video track renders
    pub fn reference_frame(&self, kind: CaptureKind) -> Frame {
        let profile = self.profile(kind);
        PatternFeed::new(profile.width, profile.height, profile.pattern).frame
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, request: &CaptureRequest) -> RecorderResult<Vec<MediaTrack>> {
        // Stand-in for the permission prompt
        tokio::task::yield_now().await;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let profile = self.profile(request.kind);
        match profile.access {
            DeviceAccess::Denied => {
                return Err(RecorderError::PermissionDenied(format!(
                    "{} access was refused",
                    request.kind
                )))
            }
            DeviceAccess::Missing => {
                return Err(RecorderError::DeviceUnavailable(format!(
                    "no {} device found",
                    request.kind
                )))
            }
            DeviceAccess::Granted => {}
        }

        if request.kind == CaptureKind::Camera && request.audio && !profile.audio {
            return Err(RecorderError::DeviceUnavailable(
                "no microphone found".to_string(),
            ));
        }

        let origin = request.kind.origin();
        let mut tracks = Vec::new();
        if request.video {
            tracks.push(MediaTrack::video(
                format!("synthetic {} video", request.kind),
                origin,
                Arc::new(PatternFeed::new(profile.width, profile.height, profile.pattern)),
            ));
        }
        // Screens without system audio silently omit the track
        if request.audio && profile.audio {
            let tone = match request.kind {
                CaptureKind::Camera => ToneFeed::new(440.0, 0.4),
                CaptureKind::Screen => ToneFeed::new(220.0, 0.4),
            };
            tracks.push(MediaTrack::audio(
                format!("synthetic {} audio", request.kind),
                origin,
                Arc::new(tone),
            ));
        }

        self.issued.fetch_add(tracks.len(), Ordering::SeqCst);
        let mut outstanding = self.outstanding.lock();
        outstanding.retain(MediaTrack::is_live);
        outstanding.extend(tracks.iter().cloned());
        Ok(tracks)
    }

    fn displays(&self) -> Vec<DisplayInfo> {
        if self.screen.access == DeviceAccess::Missing {
            return Vec::new();
        }
        vec![DisplayInfo {
            id: 1,
            name: "Synthetic Display".to_string(),
            width: self.screen.width,
            height: self.screen.height,
            is_primary: true,
            refresh_rate: Some(60),
        }]
    }

    fn cameras(&self) -> Vec<CameraInfo> {
        if self.camera.access == DeviceAccess::Missing {
            return Vec::new();
        }
        vec![CameraInfo {
            id: "synthetic-0".to_string(),
            name: "Synthetic Camera".to_string(),
            supported_resolutions: vec![Resolution {
                width: self.camera.width,
                height: self.camera.height,
            }],
            has_microphone: self.camera.audio,
        }]
    }
}
