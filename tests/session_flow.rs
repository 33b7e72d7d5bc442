//! End-to-end recording session scenarios against synthetic devices

use open_recorder_lib::capture::{CaptureKind, SyntheticDevices, TrackKind, TrackOrigin};
use open_recorder_lib::compositor::overlay_rect;
use open_recorder_lib::config::{CompositorSettings, EncoderBackend, RecorderSettings, RecordingMode};
use open_recorder_lib::encoder::{ffmpeg, MediaEncoder, StreamInfo};
use open_recorder_lib::frame::Frame;
use open_recorder_lib::session::{RecordingSession, SessionEvent, SessionState};
use open_recorder_lib::utils::error::{RecorderError, RecorderResult};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn settings(mode: RecordingMode) -> RecorderSettings {
    let mut settings = RecorderSettings {
        mode,
        compositor: CompositorSettings {
            canvas_width: 64,
            canvas_height: 36,
            overlay_width: 16,
            overlay_height: 9,
            overlay_margin: 2,
            refresh_rate: 30,
        },
        ..RecorderSettings::default()
    };
    settings.encoder.frame_rate = 10;
    settings.encoder.timeslice_ms = 500;
    settings.encoder.sample_rate = 8000;
    settings
}

fn external(
    mode: RecordingMode,
    devices: SyntheticDevices,
) -> (RecordingSession, Arc<SyntheticDevices>) {
    let devices = Arc::new(devices);
    let session = RecordingSession::with_external_encoder(settings(mode), devices.clone()).unwrap();
    (session, devices)
}

/// Encodes `frames` video frames, then fails
struct FlakyEncoder {
    frames: u32,
}

impl MediaEncoder for FlakyEncoder {
    fn mime_type(&self) -> &str {
        "video/webm"
    }

    fn encode_video(&mut self, _frame: &Frame, _timestamp: Duration) -> RecorderResult<()> {
        if self.frames == 0 {
            return Err(RecorderError::EncodingFailure("hardware encoder reset".to_string()));
        }
        self.frames -= 1;
        Ok(())
    }

    fn encode_audio(&mut self, _samples: &[f32], _timestamp: Duration) -> RecorderResult<()> {
        Ok(())
    }

    fn flush(&mut self) -> RecorderResult<Vec<u8>> {
        Ok(vec![0x42; 4])
    }

    fn finish(&mut self) -> RecorderResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Acquisition
// =============================================================================

#[tokio::test]
async fn test_denied_camera_keeps_session_idle() {
    let (mut session, devices) = external(
        RecordingMode::Camera,
        SyntheticDevices::new().deny(CaptureKind::Camera),
    );
    let mut events = session.subscribe();

    let err = session.enable_camera().await.unwrap_err();
    assert!(matches!(err, RecorderError::PermissionDenied(_)));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(devices.live_tracks(), 0);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Error { .. })));

    // Retrying is allowed and fails the same way
    assert!(session.enable_camera().await.is_err());
    assert_eq!(devices.acquisitions(), 2);
}

#[tokio::test]
async fn test_failed_acquisition_after_camera_off_stays_off() {
    let devices = Arc::new(SyntheticDevices::new().without_audio(CaptureKind::Camera));
    let mut session =
        RecordingSession::with_external_encoder(settings(RecordingMode::screen()), devices.clone())
            .unwrap();
    session.enable_camera().await.unwrap();
    session.disable_camera();
    assert_eq!(session.state(), SessionState::CameraOff);

    session
        .set_mode(RecordingMode::Screen {
            external_audio: true,
            camera_overlay: false,
        })
        .unwrap();
    let err = session.enable_camera().await.unwrap_err();
    assert!(matches!(err, RecorderError::DeviceUnavailable(_)));
    assert_eq!(session.state(), SessionState::CameraOff);
}

#[tokio::test]
async fn test_partial_acquisition_is_released() {
    let (mut session, devices) = external(
        RecordingMode::Screen {
            external_audio: true,
            camera_overlay: true,
        },
        SyntheticDevices::new().missing(CaptureKind::Camera),
    );

    let err = session.enable_camera().await.unwrap_err();
    assert!(err.is_acquisition_failure());
    assert_eq!(session.state(), SessionState::Idle);
    // The screen was acquired before the camera failed
    assert_eq!(devices.issued_tracks(), 2);
    assert_eq!(devices.live_tracks(), 0);
}

// =============================================================================
// Recording
// =============================================================================

#[tokio::test]
async fn test_camera_and_mic_chunks_make_thirty_bytes() {
    let (mut session, _) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    let emitter = session.chunk_emitter().unwrap();
    emitter.emit(vec![1; 10]).unwrap();
    emitter.emit(vec![2; 20]).unwrap();

    let info = session.stop_recording().unwrap();
    assert_eq!(info.size, 30);
    assert_eq!(session.artifact().unwrap().len(), 30);
    assert_eq!(session.state(), SessionState::Previewing);
}

#[tokio::test]
async fn test_stop_without_chunks_yields_empty_artifact() {
    let (mut session, _) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    let info = session.stop_recording().unwrap();
    assert_eq!(info.size, 0);
    let url = info.url.clone();
    assert_eq!(session.resolve(&url).unwrap().len(), 0);
}

#[tokio::test]
async fn test_stop_twice_equals_stop_once() {
    let (mut session, devices) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();
    session.chunk_emitter().unwrap().emit(b"data".to_vec()).unwrap();

    let first = session.stop_recording();
    let snapshot = session.snapshot();
    let second = session.stop_recording();

    assert_eq!(first, second);
    assert_eq!(snapshot, session.snapshot());
    assert_eq!(devices.live_tracks(), 0);
}

#[tokio::test]
async fn test_chunks_concatenate_in_emission_order() {
    let (mut session, _) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    let emitter = session.chunk_emitter().unwrap();
    for chunk in [&b"c1"[..], b"c2", b"c3"] {
        emitter.emit(chunk.to_vec()).unwrap();
    }
    session.stop_recording();

    let artifact = session.artifact().unwrap();
    assert_eq!(artifact.bytes(), b"c1c2c3");
    assert_eq!(
        session.resolve(artifact.handle().url()).as_deref(),
        Some(&b"c1c2c3"[..])
    );
}

#[tokio::test]
async fn test_camera_off_while_recording_keeps_artifact() {
    let (mut session, devices) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();
    let stream = session.composed_stream().unwrap().clone();
    session.chunk_emitter().unwrap().emit(vec![9; 12]).unwrap();
    let mut events = session.subscribe();

    session.disable_camera();

    assert_eq!(session.state(), SessionState::Previewing);
    assert_eq!(session.artifact().unwrap().len(), 12);
    assert_eq!(devices.live_tracks(), 0);
    assert!(!stream.has_live_tracks());

    // A single stop, announced before the artifact
    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged { to, .. } => order.push(format!("state:{to}")),
            SessionEvent::ArtifactReady { artifact } => {
                assert_eq!(artifact.size, 12);
                order.push("artifact".to_string());
            }
            _ => {}
        }
    }
    assert_eq!(order, vec!["state:previewing", "artifact"]);
}

#[tokio::test]
async fn test_reset_discards_artifact_and_handle() {
    let (mut session, _) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();
    session.chunk_emitter().unwrap().emit(vec![1; 4]).unwrap();
    let url = session.stop_recording().unwrap().url;

    session.reset().unwrap();
    assert!(session.resolve(&url).is_none());
    assert!(session.artifact().is_none());
    assert_eq!(session.state(), SessionState::Idle);

    // The session can be used again
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();
    assert_eq!(session.state(), SessionState::Recording);
}

// =============================================================================
// Composition
// =============================================================================

#[tokio::test]
async fn test_primary_only_frames_are_unmodified() {
    let (mut session, devices) = external(
        RecordingMode::screen(),
        SyntheticDevices::new().with_size(CaptureKind::Screen, 64, 36),
    );
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    let canvas = session.preview_frame().unwrap();
    assert_eq!(canvas, devices.reference_frame(CaptureKind::Screen));
}

#[tokio::test]
async fn test_camera_overlay_only_touches_the_inset() {
    let mode = RecordingMode::Screen {
        external_audio: true,
        camera_overlay: true,
    };
    let (mut session, devices) =
        external(mode, SyntheticDevices::new().with_size(CaptureKind::Screen, 64, 36));
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    let canvas = session.preview_frame().unwrap();
    let screen = devices.reference_frame(CaptureKind::Screen);
    let camera = devices.reference_frame(CaptureKind::Camera);
    let rect = overlay_rect(&session.settings().compositor);

    for y in 0..36 {
        for x in 0..64 {
            if rect.contains(x, y) {
                assert_eq!(canvas.pixel(x, y), camera.pixel(0, 0));
            } else {
                assert_eq!(canvas.pixel(x, y), screen.pixel(x, y));
            }
        }
    }
}

#[tokio::test]
async fn test_overlay_camera_ending_stops_recording() {
    let mode = RecordingMode::Screen {
        external_audio: true,
        camera_overlay: true,
    };
    let (mut session, devices) = external(mode, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    let camera_video = session
        .capture_tracks()
        .into_iter()
        .find(|t| t.origin() == TrackOrigin::Camera && t.kind() == TrackKind::Video)
        .unwrap();
    camera_video.stop();

    assert!(session.poll().is_none());
    assert_eq!(session.state(), SessionState::Previewing);
    assert!(session.artifact().is_some());
    assert_eq!(devices.live_tracks(), 0);
}

// =============================================================================
// Encoding
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_builtin_matroska_recording_downloads() {
    let devices = Arc::new(SyntheticDevices::new());
    let mut settings = settings(RecordingMode::Camera);
    settings.encoder.backend = EncoderBackend::Matroska;
    settings.download_file_name = "recording.mkv".to_string();
    let mut session = RecordingSession::new(settings, devices).unwrap();
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(session.poll().is_none());
    assert!(session.recorder().chunks().len() >= 2);

    let info = session.stop_recording().unwrap();
    assert!(!info.partial);
    assert_eq!(info.mime_type, "video/x-matroska");

    let dir = tempdir().unwrap();
    let path = session.download(dir.path()).unwrap();
    assert_eq!(path, dir.path().join("recording.mkv"));
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(bytes.len(), info.size);
    assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
}

#[tokio::test]
async fn test_ffmpeg_recording_is_webm() {
    let mut settings = settings(RecordingMode::Camera);
    settings.encoder.backend = EncoderBackend::Ffmpeg;
    if !ffmpeg::is_available(&settings.encoder.ffmpeg_path) {
        return;
    }
    let devices = Arc::new(SyntheticDevices::new());
    let mut session = RecordingSession::new(settings, devices).unwrap();
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(session.poll().is_none());

    let info = session.stop_recording().unwrap();
    assert!(!info.partial);
    assert_eq!(info.mime_type, "video/webm");
    let bytes = session.artifact().unwrap().bytes();
    assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    assert!(bytes.windows(5).any(|w| w == b"V_VP8"));
}

#[tokio::test]
async fn test_missing_ffmpeg_refuses_to_start() {
    let mut settings = settings(RecordingMode::Camera);
    settings.encoder.backend = EncoderBackend::Ffmpeg;
    settings.encoder.ffmpeg_path = "/nonexistent/open-recorder-ffmpeg".to_string();
    let devices = Arc::new(SyntheticDevices::new());
    let mut session = RecordingSession::new(settings, devices.clone()).unwrap();
    session.enable_camera().await.unwrap();

    let err = session.start_recording().unwrap_err();
    assert!(matches!(err, RecorderError::EncodingFailure(_)));
    assert_eq!(session.state(), SessionState::CameraOn);
    assert_eq!(devices.live_tracks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_encoder_failure_keeps_partial_artifact() {
    let devices = Arc::new(SyntheticDevices::new());
    let factory = |_: &StreamInfo| -> RecorderResult<Box<dyn MediaEncoder>> {
        Ok(Box::new(FlakyEncoder { frames: 7 }))
    };
    let mut session = RecordingSession::with_encoder_factory(
        settings(RecordingMode::Camera),
        devices.clone(),
        Arc::new(factory),
    )
    .unwrap();
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let err = session.poll().unwrap();
    assert!(matches!(err, RecorderError::EncodingFailure(_)));

    assert_eq!(session.state(), SessionState::Previewing);
    assert_eq!(devices.live_tracks(), 0);
    let artifact = session.artifact().unwrap();
    assert!(artifact.is_partial());
    // One timeslice (five frames) was flushed before the failure
    assert_eq!(artifact.bytes(), &[0x42; 4][..]);
    assert_eq!(session.last_error().unwrap().code, "ENCODING_FAILURE");
}

// =============================================================================
// Elapsed time
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_halts_on_stop_and_resets_on_reset() {
    let (mut session, _) = external(RecordingMode::Camera, SyntheticDevices::new());
    session.enable_camera().await.unwrap();
    session.start_recording().unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(session.elapsed(), 3);
    assert_eq!(session.snapshot().elapsed, "00:03");

    session.stop_recording();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.elapsed(), 3);

    session.reset().unwrap();
    assert_eq!(session.elapsed(), 0);
}
