//! Open Recorder - camera and screen recordings, composed and encoded in memory.
//!
//! This is the main library crate. It provides capture, composition,
//! recording and the session state machine that drives them, plus the
//! timed run used by the `open-recorder` binary.

pub mod capture;
pub mod commands;
pub mod compositor;
pub mod config;
pub mod encoder;
pub mod frame;
pub mod recorder;
pub mod session;
pub mod utils;

use anyhow::Context;
use commands::SessionController;
use config::{CaptureBackend, RecorderSettings};
use session::{format_elapsed, RecordingSession, SessionEvent, SessionState};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber. Calling it again has no effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_recorder_lib=debug,open_recorder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Settings for a run without a settings file: generated test signals
/// instead of hardware, encoded by FFmpeg
pub fn demo_settings() -> RecorderSettings {
    let mut settings = RecorderSettings::default();
    settings.capture.backend = CaptureBackend::Synthetic;
    settings
}

/// Record `seconds` from the configured devices and save the result into
/// `output_dir`. Returns the path of the saved recording.
pub async fn run(
    config_path: Option<&Path>,
    seconds: u64,
    output_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let settings = match config_path {
        Some(path) => RecorderSettings::load(path)
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => demo_settings(),
    };

    let system = commands::get_system_info();
    tracing::info!(
        "Starting Open Recorder v{} on {} {} ({})",
        system.app_version,
        system.os,
        system.os_version,
        system.arch
    );

    let devices = capture::devices_for(&settings);
    let list = commands::list_devices(devices.as_ref());
    for screen in &list.displays {
        tracing::info!("Display {}: {}x{}", screen.name, screen.width, screen.height);
    }
    for camera in &list.cameras {
        tracing::info!("Camera {} (microphone: {})", camera.name, camera.has_microphone);
    }

    let session = RecordingSession::new(settings, devices)?;
    let controller = SessionController::new(session);

    let mut events = controller.subscribe().await;
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Elapsed { seconds }) => {
                    tracing::info!("Recording {}", format_elapsed(seconds));
                }
                Ok(SessionEvent::ArtifactReady { artifact }) => {
                    tracing::info!("Recording ready at {}", artifact.url);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.camera_on().await?;
    controller.start_recording().await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        let snapshot = controller.poll().await;
        if snapshot.state != SessionState::Recording {
            tracing::warn!("Recording ended early ({})", snapshot.state);
            break;
        }
    }

    let artifact = controller
        .stop_recording()
        .await?
        .context("Recording produced no artifact")?;
    tracing::info!(
        "Recorded {} bytes in {} chunk(s){}",
        artifact.size,
        artifact.chunk_count,
        if artifact.partial { ", partial" } else { "" }
    );

    let path = controller.download_recording(output_dir).await?;
    controller.shutdown().await;
    logger.abort();
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::EncoderBackend;
    use tempfile::tempdir;

    #[test]
    fn test_demo_settings_are_valid() {
        demo_settings().validate().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_recording() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("settings.json");
        let mut settings = demo_settings();
        settings.encoder.backend = EncoderBackend::Matroska;
        settings.download_file_name = "recording.mkv".to_string();
        settings.compositor.canvas_width = 64;
        settings.compositor.canvas_height = 36;
        settings.compositor.overlay_width = 16;
        settings.compositor.overlay_height = 9;
        settings.compositor.overlay_margin = 2;
        settings.encoder.frame_rate = 5;
        settings.encoder.sample_rate = 8000;
        settings.save(&config).unwrap();

        let path = run(Some(&config), 2, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("recording.mkv"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    }
}
