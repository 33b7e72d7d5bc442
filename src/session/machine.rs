//! Recording session
//!
//! The state machine that ties capture, composition and recording together.
//! Each component is an owned object held by the session for exactly as long
//! as its state needs it:
//!
//! - `CameraOn` holds the capture sources
//! - `Recording` adds the compositor, a running recorder and the timer
//! - `Previewing` holds the artifact (and the capture, if it is kept)
//!
//! Every failing action leaves the session in the state it was in.

use super::state::{Affordances, SessionEvent, SessionSnapshot, SessionState};
use super::timer::{format_elapsed, ElapsedTimer};
use crate::capture::{CaptureKind, CaptureSource, MediaDevices, MediaTrack};
use crate::compositor::{ComposedStream, StreamCompositor};
use crate::config::{RecorderSettings, RecordingMode};
use crate::encoder::{self, EncoderFactory};
use crate::frame::Frame;
use crate::recorder::{
    ArtifactInfo, ChunkEmitter, ContentRegistry, Recorder, RecordingArtifact,
};
use crate::utils::error::{ErrorResponse, RecorderError, RecorderResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub struct RecordingSession {
    settings: RecorderSettings,
    devices: Arc<dyn MediaDevices>,
    registry: ContentRegistry,
    state: SessionState,

    /// Camera, or screen in screen mode
    primary: Option<CaptureSource>,
    /// Camera (microphone, optionally video) next to a screen capture
    auxiliary: Option<CaptureSource>,

    compositor: Option<StreamCompositor>,
    recorder: Recorder,
    timer: ElapsedTimer,

    epoch: Instant,
    last_error: Option<ErrorResponse>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl RecordingSession {
    /// Session recording with the built-in encoder the settings select
    pub fn new(settings: RecorderSettings, devices: Arc<dyn MediaDevices>) -> RecorderResult<Self> {
        let factory = encoder::factory_for(&settings.encoder);
        Self::build(settings, devices, Some(factory))
    }

    /// Session using a custom encoder
    pub fn with_encoder_factory(
        settings: RecorderSettings,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn EncoderFactory>,
    ) -> RecorderResult<Self> {
        Self::build(settings, devices, Some(factory))
    }

    /// Session whose chunks are pushed by an outside encoder through
    /// `chunk_emitter`
    pub fn with_external_encoder(
        settings: RecorderSettings,
        devices: Arc<dyn MediaDevices>,
    ) -> RecorderResult<Self> {
        Self::build(settings, devices, None)
    }

    fn build(
        settings: RecorderSettings,
        devices: Arc<dyn MediaDevices>,
        factory: Option<Arc<dyn EncoderFactory>>,
    ) -> RecorderResult<Self> {
        settings.validate()?;

        let registry = ContentRegistry::new(&settings.content_origin);
        let recorder = match factory {
            Some(factory) => Recorder::with_encoder(settings.encoder.clone(), registry.clone(), factory),
            None => Recorder::new(settings.encoder.clone(), registry.clone()),
        };
        let (event_tx, _) = broadcast::channel(100);

        tracing::debug!("Created recording session in {:?} mode", settings.mode);
        Ok(Self {
            timer: ElapsedTimer::new(event_tx.clone()),
            settings,
            devices,
            registry,
            state: SessionState::Idle,
            primary: None,
            auxiliary: None,
            compositor: None,
            recorder,
            epoch: Instant::now(),
            last_error: None,
            event_tx,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn mode(&self) -> RecordingMode {
        self.settings.mode
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    /// Whole seconds recorded
    pub fn elapsed(&self) -> u64 {
        self.timer.elapsed()
    }

    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.recorder.artifact()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn last_error(&self) -> Option<&ErrorResponse> {
        self.last_error.as_ref()
    }

    /// Tracks held by the capture sources
    pub fn capture_tracks(&self) -> Vec<MediaTrack> {
        self.sources().flat_map(|s| s.tracks().iter().cloned()).collect()
    }

    /// The stream being recorded
    pub fn composed_stream(&self) -> Option<&ComposedStream> {
        self.compositor.as_ref().map(StreamCompositor::stream)
    }

    /// Emitter of the current recording, for external encoders
    pub fn chunk_emitter(&self) -> Option<ChunkEmitter> {
        self.recorder.emitter()
    }

    /// Whether capture is held and every captured track is live
    pub fn capture_ready(&self) -> bool {
        self.primary.is_some() && self.sources().all(CaptureSource::all_live)
    }

    pub fn affordances(&self) -> Affordances {
        Affordances::for_state(
            self.state,
            self.capture_ready(),
            self.recorder.artifact().is_some(),
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let elapsed = self.timer.elapsed();
        SessionSnapshot {
            state: self.state,
            mode: self.settings.mode,
            elapsed_seconds: elapsed,
            elapsed: format_elapsed(elapsed),
            artifact: self.recorder.artifact().map(RecordingArtifact::info),
            tracks: self.capture_tracks().iter().map(MediaTrack::info).collect(),
            affordances: self.affordances(),
            last_error: self.last_error.clone(),
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Change the mode. Takes effect with the next capture acquisition.
    pub fn set_mode(&mut self, mode: RecordingMode) -> RecorderResult<()> {
        if self.state == SessionState::Recording {
            return Err(self.fail(RecorderError::InvalidTransition {
                action: "change the recording mode",
                state: self.state,
            }));
        }
        if self.settings.mode != mode {
            tracing::info!("Recording mode set to {:?}", mode);
            self.settings.mode = mode;
        }
        Ok(())
    }

    /// Acquire capture for the current mode. On failure nothing stays
    /// acquired and the state does not change.
    pub async fn enable_camera(&mut self) -> RecorderResult<()> {
        match self.state {
            SessionState::CameraOn => return Ok(()),
            SessionState::Idle | SessionState::CameraOff => {}
            state => {
                return Err(self.fail(RecorderError::InvalidTransition {
                    action: "enable the camera",
                    state,
                }))
            }
        }

        let acquired = self.acquire().await;
        match acquired {
            Ok((primary, auxiliary)) => {
                self.primary = Some(primary);
                self.auxiliary = auxiliary;
                self.last_error = None;
                self.transition(SessionState::CameraOn);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn acquire(&self) -> RecorderResult<(CaptureSource, Option<CaptureSource>)> {
        let devices = self.devices.as_ref();
        match self.settings.mode {
            RecordingMode::Camera => {
                let camera = CaptureSource::acquire(devices, CaptureKind::Camera, true, true).await?;
                Ok((camera, None))
            }
            RecordingMode::Screen {
                external_audio,
                camera_overlay,
            } => {
                let screen = CaptureSource::acquire(devices, CaptureKind::Screen, true, true).await?;
                if !external_audio {
                    return Ok((screen, None));
                }
                // On failure `screen` is dropped, which releases it
                let camera = CaptureSource::acquire(
                    devices,
                    CaptureKind::Camera,
                    true,
                    camera_overlay,
                )
                .await?;
                Ok((screen, Some(camera)))
            }
        }
    }

    /// Release capture. A running recording is stopped first and its
    /// artifact kept.
    pub fn disable_camera(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::CameraOff => {}
            SessionState::CameraOn => {
                self.release_capture();
                self.transition(SessionState::CameraOff);
            }
            SessionState::Recording => {
                tracing::info!("Camera disabled during recording, stopping it first");
                self.finish_recording();
                self.release_capture();
            }
            SessionState::Previewing => {
                self.release_capture();
            }
        }
    }

    /// Compose the captured tracks and start recording them
    pub fn start_recording(&mut self) -> RecorderResult<()> {
        match self.state {
            SessionState::CameraOn => {}
            SessionState::Recording => return Err(self.fail(RecorderError::AlreadyRecording)),
            state => {
                return Err(self.fail(RecorderError::InvalidTransition {
                    action: "start recording",
                    state,
                }))
            }
        }

        let (video, audio) = self.split_capture();
        let mut compositor =
            match StreamCompositor::new(&video, &audio, &self.settings.compositor) {
                Ok(compositor) => compositor,
                Err(e) => return Err(self.fail(e)),
            };
        if let Err(e) = compositor.start() {
            return Err(self.fail(e));
        }
        compositor.render_now();

        if let Err(e) = self.recorder.start(compositor.stream()) {
            compositor.stop();
            return Err(self.fail(e));
        }

        self.compositor = Some(compositor);
        self.timer.start();
        self.last_error = None;
        self.transition(SessionState::Recording);
        Ok(())
    }

    /// Stop the recording. Calling it when nothing is recording changes
    /// nothing; either way the current artifact is returned.
    pub fn stop_recording(&mut self) -> Option<ArtifactInfo> {
        if self.state == SessionState::Recording {
            self.finish_recording();
        }
        self.recorder.artifact().map(RecordingArtifact::info)
    }

    /// Discard the artifact and return to `CameraOn` (capture kept) or `Idle`
    pub fn reset(&mut self) -> RecorderResult<()> {
        if self.state == SessionState::Recording {
            return Err(self.fail(RecorderError::InvalidTransition {
                action: "reset",
                state: self.state,
            }));
        }

        self.recorder.reset();
        self.timer.reset();
        self.last_error = None;

        if self.state == SessionState::Previewing {
            let next = if self.capture_ready() {
                SessionState::CameraOn
            } else {
                self.release_capture();
                SessionState::Idle
            };
            self.transition(next);
        }
        Ok(())
    }

    /// Tear everything down and go back to `Idle`
    pub fn shutdown(&mut self) {
        self.recorder.reset();
        self.timer.reset();
        if let Some(mut compositor) = self.compositor.take() {
            compositor.stop();
        }
        self.release_capture();
        self.transition(SessionState::Idle);
    }

    /// React to things that happened since the last call: encoder failures
    /// end the recording with a partial artifact, and capture that ended
    /// outside the session stops the recording or turns the camera off.
    pub fn poll(&mut self) -> Option<RecorderError> {
        match self.state {
            SessionState::Recording => {
                if let Some(error) = self.recorder.poll() {
                    self.finish_recording();
                    self.release_capture();
                    return Some(self.fail(error));
                }
                let live = self
                    .compositor
                    .as_ref()
                    .is_some_and(|c| c.stream().is_live());
                if !live {
                    tracing::warn!("Capture ended during recording, stopping");
                    self.finish_recording();
                    self.release_capture();
                }
                None
            }
            SessionState::CameraOn if !self.capture_ready() => {
                tracing::warn!("Capture ended outside the session, turning camera off");
                self.release_capture();
                self.transition(SessionState::CameraOff);
                None
            }
            _ => None,
        }
    }

    /// Save the artifact into `dir` under the configured file name
    pub fn download(&self, dir: &Path) -> RecorderResult<PathBuf> {
        let artifact = self.recorder.artifact().ok_or(RecorderError::NoArtifact)?;
        artifact.download_to(dir, &self.settings.download_file_name)
    }

    /// Bytes behind a content handle URL
    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.registry.resolve(url)
    }

    /// What the preview element shows: the composed canvas while recording,
    /// the raw capture otherwise
    pub fn preview_frame(&self) -> Option<Frame> {
        if let Some(compositor) = &self.compositor {
            return Some(compositor.snapshot());
        }
        let track = self
            .primary
            .as_ref()?
            .video_tracks()
            .into_iter()
            .find(MediaTrack::is_live)?;
        track.video_frame(self.epoch.elapsed())
    }

    pub fn preview_png(&self) -> RecorderResult<Vec<u8>> {
        self.preview_frame()
            .ok_or(RecorderError::NoActiveStream)?
            .encode_png()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn sources(&self) -> impl Iterator<Item = &CaptureSource> {
        self.primary.iter().chain(self.auxiliary.iter())
    }

    /// Video tracks (primary first) and audio tracks of the capture
    fn split_capture(&self) -> (Vec<MediaTrack>, Vec<MediaTrack>) {
        let mut video = Vec::new();
        let mut audio = Vec::new();
        for source in self.sources() {
            video.extend(source.video_tracks());
            audio.extend(source.audio_tracks());
        }
        (video, audio)
    }

    /// Recording -> Previewing. An encoder failure raised while finishing is
    /// reported like any other failed action; the partial artifact is kept.
    fn finish_recording(&mut self) {
        let info = self.recorder.stop().map(RecordingArtifact::info);
        let failure = self.recorder.take_unreported_failure();
        self.timer.halt();
        if let Some(mut compositor) = self.compositor.take() {
            compositor.stop();
        }
        if self.settings.release_on_stop {
            self.release_capture();
        }
        self.transition(SessionState::Previewing);

        if let Some(error) = failure {
            self.fail(error);
        }
        if let Some(artifact) = info {
            let _ = self.event_tx.send(SessionEvent::ArtifactReady { artifact });
        }
    }

    fn release_capture(&mut self) -> usize {
        let mut released = 0;
        if let Some(mut source) = self.primary.take() {
            released += source.release();
        }
        if let Some(mut source) = self.auxiliary.take() {
            released += source.release();
        }
        released
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!("Session {} -> {}", from, to);
        let _ = self.event_tx.send(SessionEvent::StateChanged { from, to });
    }

    fn fail(&mut self, error: RecorderError) -> RecorderError {
        tracing::warn!("Session action failed while {}: {}", self.state, error);
        let response = ErrorResponse::from(&error);
        self.last_error = Some(response.clone());
        let _ = self.event_tx.send(SessionEvent::Error { error: response });
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticDevices;
    use crate::config::CompositorSettings;
    use crate::encoder::{MediaEncoder, StreamInfo};
    use std::time::Duration;

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
        settings.encoder.sample_rate = 8000;
        settings
    }

    fn session(mode: RecordingMode) -> (RecordingSession, Arc<SyntheticDevices>) {
        let devices = Arc::new(SyntheticDevices::new());
        let session =
            RecordingSession::with_external_encoder(settings(mode), devices.clone()).unwrap();
        (session, devices)
    }

    /// Accepts media but cannot finalize the container
    struct UnfinishedEncoder;

    impl MediaEncoder for UnfinishedEncoder {
        fn mime_type(&self) -> &str {
            "video/webm"
        }

        fn encode_video(&mut self, _frame: &Frame, _timestamp: Duration) -> RecorderResult<()> {
            Ok(())
        }

        fn encode_audio(&mut self, _samples: &[f32], _timestamp: Duration) -> RecorderResult<()> {
            Ok(())
        }

        fn flush(&mut self) -> RecorderResult<Vec<u8>> {
            Ok(vec![1; 3])
        }

        fn finish(&mut self) -> RecorderResult<Vec<u8>> {
            Err(RecorderError::EncodingFailure("trailer write failed".to_string()))
        }
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut bad = settings(RecordingMode::Camera);
        bad.encoder.frame_rate = 0;
        let result = RecordingSession::new(bad, Arc::new(SyntheticDevices::new()));
        assert!(matches!(result, Err(RecorderError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_requires_camera() {
        let (mut session, _) = session(RecordingMode::Camera);
        let err = session.start_recording().unwrap_err();
        assert!(matches!(
            err,
            RecorderError::InvalidTransition {
                state: SessionState::Idle,
                ..
            }
        ));
        assert_eq!(session.last_error().unwrap().code, "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (mut session, _) = session(RecordingMode::Camera);
        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        assert!(matches!(
            session.start_recording(),
            Err(RecorderError::AlreadyRecording)
        ));
        assert_eq!(session.state(), SessionState::Recording);
        assert!(!session.affordances().start);
    }

    #[tokio::test]
    async fn test_mode_locked_while_recording() {
        let (mut session, _) = session(RecordingMode::Camera);
        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        assert!(session.set_mode(RecordingMode::screen()).is_err());
        assert!(session.reset().is_err());

        session.stop_recording();
        session.set_mode(RecordingMode::screen()).unwrap();
        assert_eq!(session.mode(), RecordingMode::screen());
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle_when_capture_released() {
        let (mut session, devices) = session(RecordingMode::Camera);
        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        session.stop_recording();
        assert_eq!(devices.live_tracks(), 0);

        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.artifact().is_none());
        assert_eq!(session.elapsed(), 0);
    }

    #[tokio::test]
    async fn test_reset_keeps_capture_when_configured() {
        let mut settings = settings(RecordingMode::Camera);
        settings.release_on_stop = false;
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = RecordingSession::with_external_encoder(settings, devices.clone()).unwrap();

        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        session.stop_recording();
        assert_eq!(devices.live_tracks(), 2);
        assert!(session.affordances().camera_off);

        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::CameraOn);
        session.start_recording().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_from_recording() {
        let (mut session, devices) = session(RecordingMode::Camera);
        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        let stream = session.composed_stream().unwrap().clone();

        session.shutdown();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(devices.live_tracks(), 0);
        assert!(!stream.has_live_tracks());
        assert!(session.artifact().is_none());
    }

    #[tokio::test]
    async fn test_preview_frame_shows_camera() {
        let (mut session, devices) = session(RecordingMode::Camera);
        assert!(session.preview_frame().is_none());
        session.enable_camera().await.unwrap();
        let frame = session.preview_frame().unwrap();
        assert_eq!(frame, devices.reference_frame(CaptureKind::Camera));

        session.start_recording().unwrap();
        let canvas = session.preview_frame().unwrap();
        assert_eq!(canvas.dimensions(), (64, 36));
        assert!(session.preview_png().unwrap().starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[tokio::test]
    async fn test_poll_turns_camera_off_when_capture_ends() {
        let (mut session, _) = session(RecordingMode::Camera);
        session.enable_camera().await.unwrap();
        for track in session.capture_tracks() {
            track.stop();
        }
        assert!(session.poll().is_none());
        assert_eq!(session.state(), SessionState::CameraOff);
        assert!(session.capture_tracks().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (mut session, _) = session(RecordingMode::Camera);
        let mut events = session.subscribe();
        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        session.stop_recording();

        let mut states = Vec::new();
        let mut artifact_ready = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::StateChanged { to, .. } => states.push(to),
                SessionEvent::ArtifactReady { .. } => artifact_ready = true,
                _ => {}
            }
        }
        assert_eq!(
            states,
            vec![
                SessionState::CameraOn,
                SessionState::Recording,
                SessionState::Previewing
            ]
        );
        assert!(artifact_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_failure_on_stop_is_reported() {
        let factory = |_: &StreamInfo| -> RecorderResult<Box<dyn MediaEncoder>> {
            Ok(Box::new(UnfinishedEncoder))
        };
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = RecordingSession::with_encoder_factory(
            settings(RecordingMode::Camera),
            devices,
            Arc::new(factory),
        )
        .unwrap();
        session.enable_camera().await.unwrap();
        session.start_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(session.poll().is_none());
        let mut events = session.subscribe();

        let info = session.stop_recording().unwrap();
        assert!(info.partial);
        assert_eq!(session.state(), SessionState::Previewing);
        assert_eq!(session.last_error().unwrap().code, "ENCODING_FAILURE");

        let mut errors = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::Error { .. }) {
                errors += 1;
            }
        }
        assert_eq!(errors, 1);

        // Stopping again reports nothing new
        session.stop_recording();
        assert!(events.try_recv().is_err());
    }
}
