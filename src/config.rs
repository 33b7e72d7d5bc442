//! Recorder settings
//!
//! Settings are plain serde types so they can be stored next to the
//! application as JSON and edited by hand.

use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Recording Mode
// =============================================================================

/// Which sources a session captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecordingMode {
    /// Camera video with microphone audio
    Camera,
    /// Screen video with screen audio, optionally mixed with the microphone
    /// and overlaid with the camera
    #[serde(rename_all = "camelCase")]
    Screen {
        external_audio: bool,
        camera_overlay: bool,
    },
}

impl RecordingMode {
    /// Screen mode with nothing but the screen
    pub fn screen() -> Self {
        RecordingMode::Screen {
            external_audio: false,
            camera_overlay: false,
        }
    }

    /// Whether the camera feed is captured as video in this mode
    pub fn wants_camera_video(&self) -> bool {
        match self {
            RecordingMode::Camera => true,
            RecordingMode::Screen {
                external_audio,
                camera_overlay,
            } => *external_audio && *camera_overlay,
        }
    }
}

impl Default for RecordingMode {
    fn default() -> Self {
        Self::Camera
    }
}

// =============================================================================
// Component Settings
// =============================================================================

/// Canvas and overlay geometry for the compositor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositorSettings {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub overlay_width: u32,
    pub overlay_height: u32,
    /// Distance of the overlay from the bottom-right corner
    pub overlay_margin: u32,
    /// Display refresh rate in Hz
    pub refresh_rate: u32,
}

impl CompositorSettings {
    /// Interval between two composed frames
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate.max(1) as f64)
    }
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            canvas_width: 1280,
            canvas_height: 720,
            overlay_width: 320,
            overlay_height: 180,
            overlay_margin: 20,
            refresh_rate: 30,
        }
    }
}

/// Which built-in encoder turns the composed stream into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    /// VP8 and Opus in WebM, encoded by an `ffmpeg` child process
    Ffmpeg,
    /// Uncompressed Matroska written in-process
    Matroska,
}

impl Default for EncoderBackend {
    fn default() -> Self {
        Self::Ffmpeg
    }
}

/// Settings for the incremental encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncoderSettings {
    /// MIME type of recordings fed by an external encoder
    pub mime_type: String,
    pub backend: EncoderBackend,
    /// FFmpeg executable, looked up on `PATH` unless absolute
    pub ffmpeg_path: String,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Frames sampled from the composed stream per second
    pub frame_rate: u32,
    /// How often buffered media is emitted as a chunk
    pub timeslice_ms: u64,
    /// Sample rate of the mixed audio track
    pub sample_rate: u32,
}

impl EncoderSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    /// Audio samples pulled per video frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate / self.frame_rate.max(1)) as usize
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            mime_type: "video/webm".to_string(),
            backend: EncoderBackend::default(),
            ffmpeg_path: "ffmpeg".to_string(),
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 128,
            frame_rate: 30,
            timeslice_ms: 1000,
            sample_rate: 48_000,
        }
    }
}

/// Where capture devices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Cameras, microphones and displays of this machine
    Native,
    /// Generated test patterns and tones
    Synthetic,
}

impl Default for CaptureBackend {
    fn default() -> Self {
        Self::Native
    }
}

/// Settings for capture devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    pub backend: CaptureBackend,
    /// Camera index or name; the first camera when unset
    pub camera: Option<String>,
    /// Frames per second grabbed from the screen
    pub screen_frame_rate: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            camera: None,
            screen_frame_rate: 30,
        }
    }
}

// =============================================================================
// Recorder Settings
// =============================================================================

/// Top-level settings for a recording session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    pub mode: RecordingMode,
    pub capture: CaptureSettings,
    pub compositor: CompositorSettings,
    pub encoder: EncoderSettings,
    /// Release capture devices as soon as a recording stops
    pub release_on_stop: bool,
    /// File name used when downloading the recording
    pub download_file_name: String,
    /// Origin used when minting content handles
    pub content_origin: String,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            mode: RecordingMode::default(),
            capture: CaptureSettings::default(),
            compositor: CompositorSettings::default(),
            encoder: EncoderSettings::default(),
            release_on_stop: true,
            download_file_name: "recording.webm".to_string(),
            content_origin: "open-recorder://local".to_string(),
        }
    }
}

impl RecorderSettings {
    /// Load settings from a JSON file and validate them
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let content = fs::read_to_string(path)?;
        let settings: RecorderSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        tracing::debug!("Loaded recorder settings from {:?}", path);
        Ok(settings)
    }

    /// Write settings as pretty JSON
    pub fn save(&self, path: &Path) -> RecorderResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check that the settings describe something recordable
    pub fn validate(&self) -> RecorderResult<()> {
        let c = &self.compositor;
        if c.canvas_width == 0 || c.canvas_height == 0 {
            return Err(RecorderError::InvalidConfig(
                "canvas must have a non-zero size".to_string(),
            ));
        }
        if c.overlay_width == 0 || c.overlay_height == 0 {
            return Err(RecorderError::InvalidConfig(
                "overlay must have a non-zero size".to_string(),
            ));
        }
        let fits = |size: u32, canvas: u32| {
            size.checked_add(c.overlay_margin)
                .is_some_and(|extent| extent <= canvas)
        };
        if !fits(c.overlay_width, c.canvas_width) || !fits(c.overlay_height, c.canvas_height) {
            return Err(RecorderError::InvalidConfig(format!(
                "overlay {}x{} with margin {} does not fit a {}x{} canvas",
                c.overlay_width, c.overlay_height, c.overlay_margin, c.canvas_width, c.canvas_height
            )));
        }
        if c.refresh_rate == 0 {
            return Err(RecorderError::InvalidConfig(
                "refresh rate must be positive".to_string(),
            ));
        }

        let e = &self.encoder;
        if e.frame_rate == 0 || e.sample_rate == 0 {
            return Err(RecorderError::InvalidConfig(
                "frame rate and sample rate must be positive".to_string(),
            ));
        }
        if e.sample_rate < e.frame_rate {
            return Err(RecorderError::InvalidConfig(
                "sample rate must be at least the frame rate".to_string(),
            ));
        }
        if e.backend == EncoderBackend::Ffmpeg
            && (e.ffmpeg_path.trim().is_empty()
                || e.video_bitrate_kbps == 0
                || e.audio_bitrate_kbps == 0)
        {
            return Err(RecorderError::InvalidConfig(
                "ffmpeg encoding needs an executable and positive bitrates".to_string(),
            ));
        }
        if self.capture.screen_frame_rate == 0 {
            return Err(RecorderError::InvalidConfig(
                "screen frame rate must be positive".to_string(),
            ));
        }
        if e.timeslice_ms == 0 {
            return Err(RecorderError::InvalidConfig(
                "timeslice must be positive".to_string(),
            ));
        }
        if self.download_file_name.trim().is_empty()
            || self.download_file_name.contains(['/', '\\'])
        {
            return Err(RecorderError::InvalidConfig(format!(
                "invalid download file name {:?}",
                self.download_file_name
            )));
        }
        Ok(())
    }
}
