//! Session commands
//!
//! The button and checkbox actions of the recorder UI. Every command checks
//! the matching affordance first, so an action whose button would be
//! disabled is refused instead of reaching the state machine.

use crate::config::RecordingMode;
use crate::recorder::ArtifactInfo;
use crate::session::{RecordingSession, SessionEvent, SessionSnapshot, SessionState};
use crate::utils::error::{ErrorResponse, RecorderError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

type CommandResult<T> = Result<T, ErrorResponse>;

/// Shareable handle to one recording session
#[derive(Clone)]
pub struct SessionController {
    session: Arc<Mutex<RecordingSession>>,
}

impl SessionController {
    pub fn new(session: RecordingSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.lock().await.subscribe()
    }

    /// Turn capture on
    pub async fn camera_on(&self) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        refuse_unless(&session, session.affordances().camera_on, "enable the camera")?;
        session.enable_camera().await?;
        Ok(session.snapshot())
    }

    /// Turn capture off, stopping a running recording first
    pub async fn camera_off(&self) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        refuse_unless(&session, session.affordances().camera_off, "disable the camera")?;
        session.disable_camera();
        Ok(session.snapshot())
    }

    pub async fn start_recording(&self) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        if session.state() == SessionState::Recording {
            return Err(RecorderError::AlreadyRecording.into());
        }
        refuse_unless(&session, session.affordances().start, "start recording")?;
        session.start_recording()?;
        Ok(session.snapshot())
    }

    /// Stop recording. Repeating it returns the same artifact.
    pub async fn stop_recording(&self) -> CommandResult<Option<ArtifactInfo>> {
        let mut session = self.session.lock().await;
        Ok(session.stop_recording())
    }

    /// The single record button
    pub async fn toggle_recording(&self) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        if session.state() == SessionState::Recording {
            session.stop_recording();
        } else {
            refuse_unless(&session, session.affordances().start, "start recording")?;
            session.start_recording()?;
        }
        Ok(session.snapshot())
    }

    /// Discard the recording shown in the preview
    pub async fn reset_preview(&self) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        refuse_unless(&session, session.affordances().reset, "reset")?;
        session.reset()?;
        Ok(session.snapshot())
    }

    /// Save the recording into `dir`
    pub async fn download_recording(&self, dir: &Path) -> CommandResult<PathBuf> {
        let session = self.session.lock().await;
        if session.state() == SessionState::Recording {
            return Err(RecorderError::InvalidTransition {
                action: "download",
                state: SessionState::Recording,
            }
            .into());
        }
        Ok(session.download(dir)?)
    }

    pub async fn get_snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    /// PNG of what the preview element shows
    pub async fn get_preview_png(&self) -> CommandResult<Vec<u8>> {
        Ok(self.session.lock().await.preview_png()?)
    }

    /// Let the session react to failures and ended capture
    pub async fn poll(&self) -> SessionSnapshot {
        let mut session = self.session.lock().await;
        session.poll();
        session.snapshot()
    }

    pub async fn set_mode(&self, mode: RecordingMode) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        session.set_mode(mode)?;
        Ok(session.snapshot())
    }

    /// Screen mode checkbox: mix the microphone into the recording
    pub async fn set_external_audio(&self, enabled: bool) -> CommandResult<SessionSnapshot> {
        self.update_screen_mode(|external_audio, _| *external_audio = enabled)
            .await
    }

    /// Screen mode checkbox: draw the camera over the screen
    pub async fn set_camera_overlay(&self, enabled: bool) -> CommandResult<SessionSnapshot> {
        self.update_screen_mode(|_, camera_overlay| *camera_overlay = enabled)
            .await
    }

    async fn update_screen_mode(
        &self,
        update: impl FnOnce(&mut bool, &mut bool),
    ) -> CommandResult<SessionSnapshot> {
        let mut session = self.session.lock().await;
        let RecordingMode::Screen {
            mut external_audio,
            mut camera_overlay,
        } = session.mode()
        else {
            return Err(RecorderError::InvalidConfig(
                "screen options only apply to screen recording".to_string(),
            )
            .into());
        };
        update(&mut external_audio, &mut camera_overlay);
        session.set_mode(RecordingMode::Screen {
            external_audio,
            camera_overlay,
        })?;
        Ok(session.snapshot())
    }

    /// Release everything and return to idle
    pub async fn shutdown(&self) -> SessionSnapshot {
        let mut session = self.session.lock().await;
        session.shutdown();
        session.snapshot()
    }
}

fn refuse_unless(
    session: &RecordingSession,
    enabled: bool,
    action: &'static str,
) -> Result<(), RecorderError> {
    if enabled {
        Ok(())
    } else {
        tracing::debug!("Refusing to {} while {}", action, session.state());
        Err(RecorderError::InvalidTransition {
            action,
            state: session.state(),
        })
    }
}
