//! Camera capture using nokhwa
//!
//! The camera is opened and read on a dedicated thread. Each decoded frame
//! replaces the previous one; the compositor samples whatever is newest.

use crate::capture::traits::{CameraInfo, Resolution, VideoFeed};
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Consecutive failed reads after which the camera counts as gone
const MAX_FRAME_FAILURES: u32 = 50;

/// Get list of available cameras
pub fn list_cameras(has_microphone: bool) -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };

                CameraInfo {
                    id,
                    name: info.human_name(),
                    supported_resolutions: vec![
                        Resolution {
                            width: 1920,
                            height: 1080,
                        },
                        Resolution {
                            width: 1280,
                            height: 720,
                        },
                        Resolution {
                            width: 640,
                            height: 480,
                        },
                    ],
                    has_microphone,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Camera index for a configured id; the first camera when unset
pub fn camera_index(id: Option<&str>) -> CameraIndex {
    match id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        None => CameraIndex::Index(0),
    }
}

/// Ask the platform for camera access
async fn request_access() -> RecorderResult<()> {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    nokhwa::nokhwa_initialize(move |granted| {
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(granted);
        }
    });

    match rx.await {
        Ok(true) => Ok(()),
        _ => Err(RecorderError::PermissionDenied(
            "camera access was refused".to_string(),
        )),
    }
}

struct Opened {
    name: String,
    width: u32,
    height: u32,
}

/// Live camera behind a video track
pub struct CameraFeed {
    name: String,
    width: u32,
    height: u32,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl CameraFeed {
    pub async fn open(index: CameraIndex) -> RecorderResult<Self> {
        request_access().await?;

        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let ended = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let latest = Arc::clone(&latest);
            let running = Arc::clone(&running);
            let ended = Arc::clone(&ended);
            std::thread::spawn(move || capture_loop(index, ready_tx, latest, running, ended));
        }

        let opened = ready_rx.await.map_err(|_| {
            RecorderError::DeviceUnavailable("camera thread exited before opening".to_string())
        })??;

        Ok(Self {
            name: opened.name,
            width: opened.width,
            height: opened.height,
            latest,
            running,
            ended,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl VideoFeed for CameraFeed {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_at(&self, _at: Duration) -> Option<Frame> {
        self.latest.lock().clone()
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn capture_loop(
    index: CameraIndex,
    ready: oneshot::Sender<RecorderResult<Opened>>,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
) {
    let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(index.clone(), format) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!("Failed to open camera {:?}: {:?}", index, e);
            let _ = ready.send(Err(super::classify("camera", e.to_string())));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        tracing::error!("Failed to open camera stream: {:?}", e);
        let _ = ready.send(Err(super::classify("camera", e.to_string())));
        return;
    }

    let camera_format = camera.camera_format();
    let opened = Opened {
        name: camera.info().human_name(),
        width: camera_format.resolution().width(),
        height: camera_format.resolution().height(),
    };
    tracing::info!(
        "Camera opened: {} {}x{} @ {}fps",
        opened.name,
        opened.width,
        opened.height,
        camera_format.frame_rate()
    );
    if ready.send(Ok(opened)).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let mut failures = 0u32;
    while running.load(Ordering::SeqCst) {
        // Blocks until the camera delivers; the camera sets the pace
        match camera.frame().and_then(|buffer| buffer.decode_image::<RgbAFormat>()) {
            Ok(image) => {
                failures = 0;
                let (width, height) = image.dimensions();
                if let Some(frame) = Frame::from_rgba(width, height, image.into_raw()) {
                    *latest.lock() = Some(frame);
                }
            }
            Err(e) => {
                failures += 1;
                tracing::debug!("Failed to read camera frame: {:?}", e);
                if failures >= MAX_FRAME_FAILURES {
                    tracing::warn!("Camera stopped delivering frames");
                    ended.store(true, Ordering::SeqCst);
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {:?}", e);
    }
    tracing::info!("Camera capture stopped");
}
