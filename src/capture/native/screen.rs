//! Screen capture through FFmpeg
//!
//! FFmpeg grabs the desktop with the platform's capture device and writes
//! raw RGBA frames, already scaled to the canvas, on its stdout.

use crate::capture::traits::VideoFeed;
use crate::encoder::ffmpeg;
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long FFmpeg gets to deliver the first frame
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

const STDERR_TAIL: usize = 4096;

/// Grab device arguments for `platform` (as in `std::env::consts::OS`)
pub fn grab_args(platform: &str, frame_rate: u32, display: Option<&str>) -> Option<Vec<String>> {
    let (format, input) = match platform {
        "linux" => ("x11grab", display.unwrap_or(":0.0").to_string()),
        "macos" => ("avfoundation", "Capture screen 0:none".to_string()),
        "windows" => ("gdigrab", "desktop".to_string()),
        _ => return None,
    };
    Some(vec![
        "-f".to_string(),
        format.to_string(),
        "-framerate".to_string(),
        frame_rate.to_string(),
        "-i".to_string(),
        input,
    ])
}

/// Full FFmpeg argument list producing `width`x`height` RGBA frames
pub fn capture_args(
    platform: &str,
    frame_rate: u32,
    display: Option<&str>,
    width: u32,
    height: u32,
) -> Option<Vec<String>> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    args.extend(grab_args(platform, frame_rate, display)?);
    args.extend([
        "-vf".to_string(),
        format!("scale={}:{}", width, height),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "pipe:1".to_string(),
    ]);
    Some(args)
}

/// Read whole `width`x`height` RGBA frames until the stream ends. Returns
/// the number of frames delivered.
pub fn read_frames(
    mut source: impl Read,
    width: u32,
    height: u32,
    mut on_frame: impl FnMut(Frame),
) -> u64 {
    let size = width as usize * height as usize * 4;
    let mut frames = 0;
    loop {
        let mut data = vec![0u8; size];
        match source.read_exact(&mut data) {
            Ok(()) => {
                if let Some(frame) = Frame::from_rgba(width, height, data) {
                    frames += 1;
                    on_frame(frame);
                }
            }
            Err(e) => {
                if e.kind() != ErrorKind::UnexpectedEof {
                    tracing::debug!("Screen capture pipe read failed: {}", e);
                }
                return frames;
            }
        }
    }
}

/// Live screen behind a video track
pub struct ScreenFeed {
    width: u32,
    height: u32,
    latest: Arc<Mutex<Option<Frame>>>,
    process: Mutex<Option<Child>>,
    ended: Arc<AtomicBool>,
}

impl ScreenFeed {
    pub async fn open(
        ffmpeg_path: &str,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> RecorderResult<Self> {
        let platform = std::env::consts::OS;
        let display = std::env::var("DISPLAY").ok();
        let args = capture_args(platform, frame_rate, display.as_deref(), width, height)
            .ok_or_else(|| {
                RecorderError::DeviceUnavailable(format!(
                    "screen capture is not supported on {}",
                    platform
                ))
            })?;
        tracing::info!("Starting screen capture: {} {:?}", ffmpeg_path, args);

        let mut process = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    RecorderError::DeviceUnavailable(format!(
                        "screen capture needs FFmpeg, which was not found at {:?}",
                        ffmpeg_path
                    ))
                } else {
                    RecorderError::DeviceUnavailable(format!(
                        "Failed to start screen capture: {}",
                        e
                    ))
                }
            })?;

        let (Some(stdout), Some(stderr_pipe)) = (process.stdout.take(), process.stderr.take())
        else {
            let _ = process.kill();
            let _ = process.wait();
            return Err(RecorderError::DeviceUnavailable(
                "Failed to capture FFmpeg pipes".to_string(),
            ));
        };

        let stderr = Arc::new(Mutex::new(Vec::new()));
        {
            let stderr = Arc::clone(&stderr);
            std::thread::spawn(move || ffmpeg::collect(stderr_pipe, stderr, Some(STDERR_TAIL)));
        }

        let latest = Arc::new(Mutex::new(None));
        let ended = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        {
            let latest = Arc::clone(&latest);
            let ended = Arc::clone(&ended);
            std::thread::spawn(move || {
                let mut ready = Some(ready_tx);
                let frames = read_frames(stdout, width, height, |frame| {
                    *latest.lock() = Some(frame);
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(());
                    }
                });
                tracing::info!("Screen capture ended after {} frames", frames);
                ended.store(true, Ordering::SeqCst);
            });
        }

        let feed = Self {
            width,
            height,
            latest,
            process: Mutex::new(Some(process)),
            ended,
        };

        match tokio::time::timeout(FIRST_FRAME_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => Ok(feed),
            Ok(Err(_)) => {
                feed.stop();
                let message = String::from_utf8_lossy(&stderr.lock()).trim().to_string();
                if message.is_empty() {
                    return Err(RecorderError::DeviceUnavailable(
                        "screen capture exited before the first frame".to_string(),
                    ));
                }
                Err(super::classify("screen", message))
            }
            Err(_) => {
                feed.stop();
                Err(RecorderError::DeviceUnavailable(format!(
                    "screen capture produced no frame within {}s",
                    FIRST_FRAME_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

impl VideoFeed for ScreenFeed {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_at(&self, _at: Duration) -> Option<Frame> {
        self.latest.lock().clone()
    }

    fn stop(&self) {
        if let Some(mut process) = self.process.lock().take() {
            let _ = process.kill();
            let _ = process.wait();
            tracing::info!("Screen capture stopped");
        }
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Drop for ScreenFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
