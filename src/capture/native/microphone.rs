//! Microphone capture using cpal
//!
//! The input stream lives on its own thread, since cpal streams are not
//! `Send` on every host. Samples land in a shared `SampleQueue`.

use super::samples::SampleQueue;
use crate::capture::traits::AudioFeed;
use crate::utils::error::{RecorderError, RecorderResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Whether the host exposes a default input device
pub fn has_microphone() -> bool {
    cpal::default_host().default_input_device().is_some()
}

/// Live microphone behind an audio track
pub struct MicrophoneFeed {
    name: String,
    queue: Arc<Mutex<SampleQueue>>,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl MicrophoneFeed {
    pub async fn open() -> RecorderResult<Self> {
        let queue = Arc::new(Mutex::new(SampleQueue::new(0)));
        let running = Arc::new(AtomicBool::new(true));
        let ended = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let ended = Arc::clone(&ended);
            std::thread::spawn(move || stream_loop(ready_tx, queue, running, ended));
        }

        let name = ready_rx.await.map_err(|_| {
            RecorderError::DeviceUnavailable("microphone thread exited before opening".to_string())
        })??;

        Ok(Self {
            name,
            queue,
            running,
            ended,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AudioFeed for MicrophoneFeed {
    fn read(&self, _at: Duration, sample_rate: u32, out: &mut [f32]) {
        self.queue.lock().pull(sample_rate, out);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Drop for MicrophoneFeed {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    queue: Arc<Mutex<SampleQueue>>,
    ended: Arc<AtomicBool>,
) -> RecorderResult<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                queue.lock().push_interleaved(&samples, channels);
            },
            move |err| {
                tracing::error!("Microphone stream error: {}", err);
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    ended.store(true, Ordering::SeqCst);
                }
            },
            None,
        )
        .map_err(|e| super::classify("microphone", e.to_string()))
}

fn stream_loop(
    ready: oneshot::Sender<RecorderResult<String>>,
    queue: Arc<Mutex<SampleQueue>>,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err(RecorderError::DeviceUnavailable(
            "no microphone found".to_string(),
        )));
        return;
    };
    let name = device.name().unwrap_or_else(|_| "Microphone".to_string());

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(super::classify("microphone", e.to_string())));
            return;
        }
    };
    let config = supported.config();
    *queue.lock() = SampleQueue::new(config.sample_rate.0);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, queue, Arc::clone(&ended)),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, queue, Arc::clone(&ended)),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, queue, Arc::clone(&ended)),
        SampleFormat::I32 => build_stream::<i32>(&device, &config, queue, Arc::clone(&ended)),
        other => Err(RecorderError::DeviceUnavailable(format!(
            "unsupported microphone sample format {:?}",
            other
        ))),
    };
    let stream = match stream.and_then(|stream| {
        stream
            .play()
            .map(|_| stream)
            .map_err(|e| super::classify("microphone", e.to_string()))
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    tracing::info!(
        "Microphone opened: {} ({} Hz, {} channels)",
        name,
        config.sample_rate.0,
        config.channels
    );
    if ready.send(Ok(name)).is_err() {
        return;
    }

    while running.load(Ordering::SeqCst) && !ended.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::info!("Microphone capture stopped");
}
