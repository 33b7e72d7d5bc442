//! Encode pump
//!
//! Samples the composed stream at the encoder frame rate, feeds the encoder
//! and emits a chunk every timeslice. Runs as a spawned task that checks its
//! halt flag on every tick and under the encoder lock, so nothing reaches the
//! encoder once the recorder has taken it over to finish.

use super::chunk::ChunkEmitter;
use crate::compositor::ComposedStream;
use crate::config::EncoderSettings;
use crate::encoder::MediaEncoder;
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub(super) type SharedEncoder = Arc<Mutex<Box<dyn MediaEncoder>>>;

pub(super) struct EncodePump {
    halted: Arc<AtomicBool>,
    encoder: SharedEncoder,
    frames: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl EncodePump {
    pub(super) fn spawn(
        stream: ComposedStream,
        encoder: Box<dyn MediaEncoder>,
        settings: &EncoderSettings,
        emitter: ChunkEmitter,
    ) -> Self {
        let halted = Arc::new(AtomicBool::new(false));
        let encoder: SharedEncoder = Arc::new(Mutex::new(encoder));
        let frames = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run(
            stream,
            Arc::clone(&encoder),
            settings.clone(),
            emitter,
            Arc::clone(&halted),
            Arc::clone(&frames),
        ));

        Self {
            halted,
            encoder,
            frames,
            task,
        }
    }

    pub(super) fn frames_encoded(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop the task and hand back the encoder
    pub(super) fn halt(&self) -> SharedEncoder {
        self.halted.store(true, Ordering::Release);
        self.task.abort();
        Arc::clone(&self.encoder)
    }
}

impl Drop for EncodePump {
    fn drop(&mut self) {
        self.halted.store(true, Ordering::Release);
        self.task.abort();
    }
}

async fn run(
    stream: ComposedStream,
    encoder: SharedEncoder,
    settings: EncoderSettings,
    emitter: ChunkEmitter,
    halted: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
) {
    let frame_rate = settings.frame_rate.max(1);
    let timeslice = settings.timeslice();
    let mut samples = vec![0.0f32; settings.samples_per_frame()];
    let mut next_flush = timeslice;
    let mut frame_index: u64 = 0;

    let mut ticker = tokio::time::interval(settings.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let timestamp = media_time(frame_index, frame_rate);
        let media_end = media_time(frame_index + 1, frame_rate);
        let flush = media_end >= next_flush;

        let outcome = {
            let mut guard = encoder.lock();
            if halted.load(Ordering::Acquire) {
                break;
            }
            if !stream.video().is_live() {
                tracing::debug!("Composed stream ended, encode pump exiting");
                break;
            }
            encode_tick(
                &mut **guard,
                &stream,
                timestamp,
                settings.sample_rate,
                &mut samples,
                flush,
            )
            .map(|bytes| {
                // Sent under the lock so a concurrent finish always comes after
                emitter.emit(bytes)
            })
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::debug!("Recorder closed its chunk channel, encode pump exiting");
                break;
            }
            Err(e) => {
                tracing::error!("Encoder failed at {:?}: {}", timestamp, e);
                let _ = emitter.fail(e.to_string());
                break;
            }
        }

        frames.fetch_add(1, Ordering::Relaxed);
        frame_index += 1;
        if flush {
            next_flush += timeslice;
        }
    }
}

fn media_time(frame_index: u64, frame_rate: u32) -> Duration {
    Duration::from_nanos(frame_index * 1_000_000_000 / u64::from(frame_rate))
}

fn encode_tick(
    encoder: &mut dyn MediaEncoder,
    stream: &ComposedStream,
    timestamp: Duration,
    sample_rate: u32,
    samples: &mut [f32],
    flush: bool,
) -> RecorderResult<Vec<u8>> {
    if let Some(frame) = stream.video().video_frame(timestamp) {
        encoder.encode_video(&frame, timestamp)?;
    }
    if let Some(audio) = stream.audio() {
        if audio.read_audio(timestamp, sample_rate, samples) {
            encoder.encode_audio(samples, timestamp)?;
        }
    }
    if flush {
        encoder.flush()
    } else {
        Ok(Vec::new())
    }
}
