//! Stream composition
//!
//! Combines capture tracks into the single stream handed to the recorder:
//! one canvas-backed video track and at most one mixed audio track. The
//! canvas is redrawn on every refresh tick by a cancellable task.

pub mod audio;
pub mod video;

pub use audio::AudioMixer;
pub use video::{overlay_rect, OverlayRect, VideoCompositor};

use crate::capture::MediaTrack;
use crate::config::CompositorSettings;
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// The merged feed handed to the encoder
#[derive(Debug, Clone)]
pub struct ComposedStream {
    video: MediaTrack,
    audio: Option<MediaTrack>,
}

impl ComposedStream {
    pub fn new(video: MediaTrack, audio: Option<MediaTrack>) -> Self {
        Self { video, audio }
    }

    pub fn video(&self) -> &MediaTrack {
        &self.video
    }

    pub fn audio(&self) -> Option<&MediaTrack> {
        self.audio.as_ref()
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        let mut tracks = vec![self.video.clone()];
        tracks.extend(self.audio.iter().cloned());
        tracks
    }

    /// Every track of the stream is live
    pub fn is_live(&self) -> bool {
        self.video.is_live() && self.audio.as_ref().map_or(true, MediaTrack::is_live)
    }

    /// At least one track of the stream is live
    pub fn has_live_tracks(&self) -> bool {
        self.video.is_live() || self.audio.as_ref().is_some_and(MediaTrack::is_live)
    }
}

/// Lifecycle of a compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositorState {
    /// Built, loop not started
    Ready,
    /// Refresh loop running
    Running,
    /// Torn down; cannot be restarted
    Stopped,
}

/// Video composition plus audio mixing for one recording
pub struct StreamCompositor {
    video: Arc<VideoCompositor>,
    audio: AudioMixer,
    stream: ComposedStream,
    settings: CompositorSettings,
    state: CompositorState,
    epoch: Instant,
    halted: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl StreamCompositor {
    /// Build a compositor. Fails with `NoVideoSource` when `video_tracks`
    /// holds no live video track; zero audio tracks are fine.
    pub fn new(
        video_tracks: &[MediaTrack],
        audio_tracks: &[MediaTrack],
        settings: &CompositorSettings,
    ) -> RecorderResult<Self> {
        let video = VideoCompositor::new(video_tracks, settings)?;
        let audio = AudioMixer::new(audio_tracks);
        let stream = ComposedStream::new(video.output().clone(), audio.output().cloned());

        tracing::info!(
            "Compositor ready: {}x{} canvas, {} overlay(s), {} audio input(s)",
            settings.canvas_width,
            settings.canvas_height,
            video.overlay_count(),
            audio.input_count()
        );

        Ok(Self {
            video: Arc::new(video),
            audio,
            stream,
            settings: settings.clone(),
            state: CompositorState::Ready,
            epoch: Instant::now(),
            halted: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            task: None,
        })
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    /// Handles to the composed tracks
    pub fn stream(&self) -> &ComposedStream {
        &self.stream
    }

    pub fn audio_inputs(&self) -> usize {
        self.audio.input_count()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Spawn the refresh loop. Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> RecorderResult<()> {
        match self.state {
            CompositorState::Stopped => return Err(RecorderError::CompositorStopped),
            CompositorState::Running => return Ok(()),
            CompositorState::Ready => {}
        }

        let video = Arc::clone(&self.video);
        let halted = Arc::clone(&self.halted);
        let frames = Arc::clone(&self.frames);
        let epoch = self.epoch;
        let period = self.settings.refresh_interval();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if halted.load(Ordering::Acquire) {
                    break;
                }
                if !video.output().is_live() {
                    tracing::debug!("Composed video ended, leaving refresh loop");
                    break;
                }
                if video.render(epoch.elapsed()) {
                    frames.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));

        self.state = CompositorState::Running;
        tracing::info!("Compositor started at {} Hz", self.settings.refresh_rate);
        Ok(())
    }

    /// Render one frame immediately
    pub fn render_now(&self) -> bool {
        if self.state == CompositorState::Stopped || !self.stream.video().is_live() {
            return false;
        }
        let drawn = self.video.render(self.epoch.elapsed());
        if drawn {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
        drawn
    }

    /// Current canvas contents
    pub fn snapshot(&self) -> Frame {
        self.video.snapshot()
    }

    /// Halt the loop and end the composed tracks. Idempotent.
    pub fn stop(&mut self) {
        if self.state == CompositorState::Stopped {
            return;
        }
        self.halted.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        for track in self.stream.tracks() {
            track.stop();
        }
        self.state = CompositorState::Stopped;
        tracing::info!("Compositor stopped after {} frame(s)", self.frames_rendered());
    }
}

impl Drop for StreamCompositor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{Pattern, PatternFeed, ToneFeed};
    use crate::capture::TrackOrigin;
    use std::time::Duration;

    fn settings() -> CompositorSettings {
        CompositorSettings {
            canvas_width: 32,
            canvas_height: 18,
            overlay_width: 8,
            overlay_height: 4,
            overlay_margin: 1,
            refresh_rate: 10,
        }
    }

    fn screen() -> MediaTrack {
        MediaTrack::video(
            "screen",
            TrackOrigin::Screen,
            Arc::new(PatternFeed::new(32, 18, Pattern::Bars)),
        )
    }

    #[test]
    fn test_zero_audio_tracks_is_video_only() {
        let compositor = StreamCompositor::new(&[screen()], &[], &settings()).unwrap();
        assert!(compositor.stream().audio().is_none());
        assert!(compositor.stream().is_live());
    }

    #[test]
    fn test_zero_video_tracks_fails() {
        let mic = MediaTrack::audio("mic", TrackOrigin::Camera, Arc::new(ToneFeed::new(440.0, 0.5)));
        let err = StreamCompositor::new(&[], &[mic], &settings()).err().unwrap();
        assert!(matches!(err, RecorderError::NoVideoSource));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_renders_until_stopped() {
        let mut compositor = StreamCompositor::new(&[screen()], &[], &settings()).unwrap();
        compositor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        let rendered = compositor.frames_rendered();
        assert!(rendered >= 4, "rendered {rendered}");

        compositor.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(compositor.frames_rendered(), rendered);
        assert!(!compositor.stream().has_live_tracks());
    }

    #[tokio::test]
    async fn test_cannot_restart_after_stop() {
        let mut compositor = StreamCompositor::new(&[screen()], &[], &settings()).unwrap();
        compositor.start().unwrap();
        compositor.stop();
        compositor.stop();
        assert_eq!(compositor.state(), CompositorState::Stopped);
        assert!(matches!(compositor.start(), Err(RecorderError::CompositorStopped)));
        assert!(!compositor.render_now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_source_ends() {
        let source = screen();
        let mut compositor = StreamCompositor::new(&[source.clone()], &[], &settings()).unwrap();
        compositor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        source.stop();
        assert!(!compositor.stream().is_live());
        tokio::time::sleep(Duration::from_millis(150)).await;
        let rendered = compositor.frames_rendered();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(compositor.frames_rendered(), rendered);
    }

    #[test]
    fn test_render_now_matches_primary() {
        let source = screen();
        let reference = source.video_frame(Duration::ZERO).unwrap();
        let compositor = StreamCompositor::new(&[source], &[], &settings()).unwrap();
        assert!(compositor.render_now());
        assert_eq!(compositor.snapshot(), reference);
        assert_eq!(compositor.frames_rendered(), 1);
    }
}
