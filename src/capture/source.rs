//! Capture sources
//!
//! A `CaptureSource` owns the tracks returned by one acquisition. Sources are
//! independent: a screen source and a camera source can coexist and are
//! released separately. Dropping a source releases its tracks.

use super::track::MediaTrack;
use super::traits::{CaptureKind, CaptureRequest, MediaDevices, TrackKind};
use crate::utils::error::{RecorderError, RecorderResult};

/// Tracks acquired from one camera or screen request
#[derive(Debug)]
pub struct CaptureSource {
    request: CaptureRequest,
    tracks: Vec<MediaTrack>,
}

impl CaptureSource {
    /// Ask the platform for live tracks
    pub async fn acquire(
        devices: &dyn MediaDevices,
        kind: CaptureKind,
        want_audio: bool,
        want_video: bool,
    ) -> RecorderResult<Self> {
        if !want_audio && !want_video {
            return Err(RecorderError::InvalidConfig(format!(
                "{kind} capture must request audio or video"
            )));
        }

        let request = CaptureRequest {
            kind,
            audio: want_audio,
            video: want_video,
        };
        tracing::info!(
            "Acquiring {} capture (audio={}, video={})",
            kind,
            want_audio,
            want_video
        );

        let tracks = match devices.acquire(&request).await {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!("Failed to acquire {} capture: {}", kind, e);
                return Err(e);
            }
        };

        let source = Self { request, tracks };
        tracing::info!(
            "Acquired {} capture: {} video, {} audio track(s)",
            kind,
            source.video_tracks().len(),
            source.audio_tracks().len()
        );
        Ok(source)
    }

    pub fn kind(&self) -> CaptureKind {
        self.request.kind
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// All tracks, in the order the platform returned them
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.tracks
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    /// Whether any track is still live
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Whether every track is still live
    pub fn all_live(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(MediaTrack::is_live)
    }

    /// Stop every track. Safe to call repeatedly; returns the number of
    /// tracks this call stopped.
    pub fn release(&mut self) -> usize {
        let stopped = self.tracks.iter().filter(|t| t.stop()).count();
        if stopped > 0 {
            tracing::info!("Released {} capture ({} track(s))", self.request.kind, stopped);
        }
        stopped
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticDevices;

    #[tokio::test]
    async fn test_acquire_camera_with_audio() {
        let devices = SyntheticDevices::new();
        let source = CaptureSource::acquire(&devices, CaptureKind::Camera, true, true)
            .await
            .unwrap();
        assert_eq!(source.video_tracks().len(), 1);
        assert_eq!(source.audio_tracks().len(), 1);
        assert!(source.all_live());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let devices = SyntheticDevices::new();
        let mut source = CaptureSource::acquire(&devices, CaptureKind::Camera, true, true)
            .await
            .unwrap();
        assert_eq!(source.release(), 2);
        assert_eq!(source.release(), 0);
        assert!(!source.is_live());
    }

    #[tokio::test]
    async fn test_sources_release_independently() {
        let devices = SyntheticDevices::new();
        let mut screen = CaptureSource::acquire(&devices, CaptureKind::Screen, true, true)
            .await
            .unwrap();
        let camera = CaptureSource::acquire(&devices, CaptureKind::Camera, true, true)
            .await
            .unwrap();
        screen.release();
        assert!(!screen.is_live());
        assert!(camera.all_live());
    }

    #[tokio::test]
    async fn test_drop_releases_tracks() {
        let devices = SyntheticDevices::new();
        let source = CaptureSource::acquire(&devices, CaptureKind::Camera, false, true)
            .await
            .unwrap();
        let track = source.tracks()[0].clone();
        drop(source);
        assert!(!track.is_live());
    }

    #[tokio::test]
    async fn test_permission_denied_is_surfaced() {
        let devices = SyntheticDevices::new().deny(CaptureKind::Screen);
        let err = CaptureSource::acquire(&devices, CaptureKind::Screen, true, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let devices = SyntheticDevices::new();
        let err = CaptureSource::acquire(&devices, CaptureKind::Camera, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::InvalidConfig(_)));
        assert_eq!(devices.acquisitions(), 0);
    }
}
