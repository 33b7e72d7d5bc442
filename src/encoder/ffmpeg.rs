//! FFmpeg WebM encoder
//!
//! Media pushed to the encoder is muxed into an uncompressed Matroska stream
//! and written to an `ffmpeg` child process, which encodes VP8 video and Opus
//! audio and writes live WebM on its stdout. A flush hands back whatever WebM
//! bytes FFmpeg produced since the previous flush.

use super::matroska::MatroskaMuxer;
use super::{EncoderFactory, MediaEncoder, StreamInfo};
use crate::config::EncoderSettings;
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub const MIME_TYPE: &str = "video/webm";

/// Muxed batches queued for FFmpeg before encode calls block
const INPUT_QUEUE: usize = 64;

/// Bytes of FFmpeg's stderr kept for error messages
const STDERR_TAIL: usize = 4096;

const READ_BUFFER: usize = 64 * 1024;

/// Whether `path` runs as an FFmpeg executable
pub fn is_available(path: &str) -> bool {
    Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Arguments turning uncompressed Matroska on stdin into WebM on stdout
pub fn encode_args(info: &StreamInfo, settings: &EncoderSettings) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "matroska".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        // yuv420p needs even dimensions
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        "libvpx".to_string(),
        "-deadline".to_string(),
        "realtime".to_string(),
        "-cpu-used".to_string(),
        "8".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-b:v".to_string(),
        format!("{}k", settings.video_bitrate_kbps),
        "-g".to_string(),
        (info.frame_rate.max(1) * 2).to_string(),
    ];

    if info.audio.is_some() {
        args.extend([
            "-map".to_string(),
            "0:a:0".to_string(),
            "-c:a".to_string(),
            "libopus".to_string(),
            // Opus only runs at a handful of rates
            "-ar".to_string(),
            "48000".to_string(),
            "-b:a".to_string(),
            format!("{}k", settings.audio_bitrate_kbps),
        ]);
    }

    args.extend([
        "-f".to_string(),
        "webm".to_string(),
        "-live".to_string(),
        "1".to_string(),
        "-flush_packets".to_string(),
        "1".to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

fn spawn_error(path: &str, e: std::io::Error) -> RecorderError {
    if e.kind() == ErrorKind::NotFound {
        RecorderError::EncodingFailure(format!(
            "FFmpeg not found at {:?}. Please install FFmpeg",
            path
        ))
    } else {
        RecorderError::EncodingFailure(format!("Failed to start FFmpeg encoder: {}", e))
    }
}

/// Copy everything `source` produces into `sink`, keeping at most `keep`
/// trailing bytes when set
pub(crate) fn collect(mut source: impl Read, sink: Arc<Mutex<Vec<u8>>>, keep: Option<usize>) {
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let mut sink = sink.lock();
                sink.extend_from_slice(&buf[..n]);
                if let Some(keep) = keep {
                    let excess = sink.len().saturating_sub(keep);
                    sink.drain(..excess);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("FFmpeg pipe read failed: {}", e);
                break;
            }
        }
    }
}

/// Feed queued batches to FFmpeg. Returning drops both the receiver, which
/// fails further sends, and stdin, which signals EOF.
fn write_input(mut stdin: ChildStdin, batches: Receiver<Vec<u8>>) {
    for batch in batches {
        if let Err(e) = stdin.write_all(&batch) {
            tracing::debug!("FFmpeg stopped reading its input: {}", e);
            return;
        }
    }
}

/// Encoder backed by an `ffmpeg` child process
pub struct FfmpegEncoder {
    mezzanine: MatroskaMuxer,
    process: Child,
    input: Option<SyncSender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    output: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    frames: u64,
    finished: bool,
}

impl FfmpegEncoder {
    /// Start FFmpeg for a stream of the given shape
    pub fn spawn(info: &StreamInfo, settings: &EncoderSettings) -> RecorderResult<Self> {
        let args = encode_args(info, settings);
        tracing::info!("Starting FFmpeg encoder: {} {:?}", settings.ffmpeg_path, args);

        let mut process = Command::new(&settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&settings.ffmpeg_path, e))?;

        let pipes = (
            process.stdin.take(),
            process.stdout.take(),
            process.stderr.take(),
        );
        let (Some(stdin), Some(stdout), Some(stderr_pipe)) = pipes else {
            let _ = process.kill();
            let _ = process.wait();
            return Err(RecorderError::EncodingFailure(
                "Failed to capture FFmpeg pipes".to_string(),
            ));
        };

        let output = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let readers = vec![
            {
                let output = Arc::clone(&output);
                std::thread::spawn(move || collect(stdout, output, None))
            },
            {
                let stderr = Arc::clone(&stderr);
                std::thread::spawn(move || collect(stderr_pipe, stderr, Some(STDERR_TAIL)))
            },
        ];

        let (input, batches) = mpsc::sync_channel(INPUT_QUEUE);
        let writer = std::thread::spawn(move || write_input(stdin, batches));

        Ok(Self {
            mezzanine: MatroskaMuxer::new(info.clone()),
            process,
            input: Some(input),
            writer: Some(writer),
            output,
            readers,
            stderr,
            frames: 0,
            finished: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn failure(&self, context: &str) -> RecorderError {
        let stderr = String::from_utf8_lossy(&self.stderr.lock()).trim().to_string();
        if stderr.is_empty() {
            RecorderError::EncodingFailure(context.to_string())
        } else {
            RecorderError::EncodingFailure(format!("{}: {}", context, stderr))
        }
    }

    /// Hand muxed bytes to the writer thread
    fn push(&mut self, batch: Vec<u8>) -> RecorderResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let sent = self
            .input
            .as_ref()
            .is_some_and(|input| input.send(batch).is_ok());
        if !sent {
            return Err(self.failure("FFmpeg stopped accepting input"));
        }
        Ok(())
    }
}

impl MediaEncoder for FfmpegEncoder {
    fn mime_type(&self) -> &str {
        MIME_TYPE
    }

    fn encode_video(&mut self, frame: &Frame, timestamp: Duration) -> RecorderResult<()> {
        self.mezzanine.encode_video(frame, timestamp)?;
        let batch = self.mezzanine.flush()?;
        self.push(batch)?;
        self.frames += 1;
        Ok(())
    }

    fn encode_audio(&mut self, samples: &[f32], timestamp: Duration) -> RecorderResult<()> {
        self.mezzanine.encode_audio(samples, timestamp)?;
        let batch = self.mezzanine.flush()?;
        self.push(batch)
    }

    fn flush(&mut self) -> RecorderResult<Vec<u8>> {
        Ok(std::mem::take(&mut *self.output.lock()))
    }

    fn finish(&mut self) -> RecorderResult<Vec<u8>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        let tail = self.mezzanine.finish()?;
        self.push(tail)?;

        // Closing the queue lets the writer drain it and close stdin
        self.input = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        let status = self
            .process
            .wait()
            .map_err(|e| RecorderError::EncodingFailure(format!("Failed to wait for FFmpeg: {}", e)))?;
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }

        if !status.success() {
            return Err(self.failure(&format!("FFmpeg exited with {}", status)));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", self.frames);
        Ok(std::mem::take(&mut *self.output.lock()))
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.input = None;
        if matches!(self.process.try_wait(), Ok(None)) {
            tracing::debug!("Stopping unfinished FFmpeg encoder");
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
    }
}

/// Factory starting one FFmpeg process per recording
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    settings: EncoderSettings,
}

impl FfmpegEncoderFactory {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self, info: &StreamInfo) -> RecorderResult<Box<dyn MediaEncoder>> {
        Ok(Box::new(FfmpegEncoder::spawn(info, &self.settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::AudioInfo;

    fn info(audio: bool) -> StreamInfo {
        StreamInfo {
            width: 32,
            height: 18,
            frame_rate: 10,
            audio: audio.then_some(AudioInfo {
                sample_rate: 8000,
                channels: 1,
            }),
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_args_encode_vp8_and_opus_webm() {
        let args = encode_args(&info(true), &EncoderSettings::default());
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner -loglevel error -f matroska -i pipe:0"));
        assert!(joined.contains("-c:v libvpx"));
        assert!(joined.contains("-b:v 2500k"));
        assert!(joined.contains("-g 20"));
        assert!(joined.contains("-map 0:a:0 -c:a libopus -ar 48000 -b:a 128k"));
        assert!(joined.ends_with("-f webm -live 1 -flush_packets 1 pipe:1"));
    }

    #[test]
    fn test_args_without_audio_skip_opus() {
        let args = encode_args(&info(false), &EncoderSettings::default());
        assert!(!args.iter().any(|a| a == "libopus" || a == "0:a:0"));
    }

    #[test]
    fn test_missing_executable_is_encoding_failure() {
        let settings = EncoderSettings {
            ffmpeg_path: "/nonexistent/open-recorder-ffmpeg".to_string(),
            ..EncoderSettings::default()
        };
        let err = FfmpegEncoder::spawn(&info(false), &settings).err().unwrap();
        match err {
            RecorderError::EncodingFailure(message) => assert!(message.contains("not found")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!is_available(&settings.ffmpeg_path));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_process_fails_finish() {
        // `false` exits with status 1 without reading its input
        let settings = EncoderSettings {
            ffmpeg_path: "false".to_string(),
            ..EncoderSettings::default()
        };
        let mut encoder = FfmpegEncoder::spawn(&info(false), &settings).unwrap();
        let _ = encoder.encode_video(&Frame::new(32, 18), Duration::ZERO);
        let err = encoder.finish().unwrap_err();
        assert!(matches!(err, RecorderError::EncodingFailure(_)));
        assert!(encoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_encodes_playable_webm() {
        let settings = EncoderSettings::default();
        if !is_available(&settings.ffmpeg_path) {
            return;
        }

        let mut encoder = FfmpegEncoder::spawn(&info(true), &settings).unwrap();
        let frame = Frame::solid(32, 18, [200, 40, 40, 255]);
        let samples = vec![0.25f32; 800];
        let mut bytes = Vec::new();
        for i in 0..20u64 {
            let at = Duration::from_millis(i * 100);
            encoder.encode_video(&frame, at).unwrap();
            encoder.encode_audio(&samples, at).unwrap();
            bytes.extend(encoder.flush().unwrap());
        }
        bytes.extend(encoder.finish().unwrap());

        assert_eq!(encoder.frames_written(), 20);
        assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert!(contains(&bytes, b"webm"));
        assert!(contains(&bytes, b"V_VP8"));
        assert!(contains(&bytes, b"A_OPUS"));
        assert!(!contains(&bytes, b"V_UNCOMPRESSED"));
    }
}
