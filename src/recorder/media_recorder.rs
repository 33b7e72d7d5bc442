//! Recorder
//!
//! Consumes a composed stream, buffers emitted chunks in order and turns them
//! into one immutable artifact when stopped. The recorder owns the chunk
//! buffer for the whole recording; nothing else can append to it except
//! through the emitter handed out by `start`.

use super::artifact::{ContentRegistry, RecordingArtifact};
use super::chunk::{Chunk, ChunkEmitter, ChunkEvent};
use super::pump::EncodePump;
use super::state::RecorderState;
use crate::compositor::ComposedStream;
use crate::config::EncoderSettings;
use crate::encoder::{AudioInfo, EncoderFactory, StreamInfo};
use crate::utils::error::{RecorderError, RecorderResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct Recorder {
    settings: EncoderSettings,
    registry: ContentRegistry,
    encoder_factory: Option<Arc<dyn EncoderFactory>>,
    state: RecorderState,
    events: Option<mpsc::UnboundedReceiver<ChunkEvent>>,
    emitter: Option<ChunkEmitter>,
    pump: Option<EncodePump>,
    mime_type: String,
    chunks: Vec<Chunk>,
    chunk_count: u64,
    started_at: Option<Instant>,
    failure: Option<String>,
    failure_reported: bool,
    artifact: Option<RecordingArtifact>,
}

impl Recorder {
    /// Recorder fed by an external encoder through the returned emitter
    pub fn new(settings: EncoderSettings, registry: ContentRegistry) -> Self {
        Self {
            settings,
            registry,
            encoder_factory: None,
            state: RecorderState::Inactive,
            events: None,
            emitter: None,
            pump: None,
            mime_type: String::new(),
            chunks: Vec::new(),
            chunk_count: 0,
            started_at: None,
            failure: None,
            failure_reported: false,
            artifact: None,
        }
    }

    /// Recorder that encodes the stream itself
    pub fn with_encoder(
        settings: EncoderSettings,
        registry: ContentRegistry,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        let mut recorder = Self::new(settings, registry);
        recorder.encoder_factory = Some(factory);
        recorder
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.artifact.as_ref()
    }

    /// Chunks of the running recording drained so far, in emission order.
    /// Empty once the recording has been assembled into its artifact.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    /// Message of the encoder failure that ended the last recording
    pub fn last_failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// An encoder failure that `poll` has not returned, such as one raised
    /// while `stop` finished the encoder. Each failure is handed out once.
    pub fn take_unreported_failure(&mut self) -> Option<RecorderError> {
        if self.failure_reported {
            return None;
        }
        let message = self.failure.clone()?;
        self.failure_reported = true;
        Some(RecorderError::EncodingFailure(message))
    }

    pub fn frames_encoded(&self) -> u64 {
        self.pump.as_ref().map_or(0, EncodePump::frames_encoded)
    }

    /// Emitter of the running recording
    pub fn emitter(&self) -> Option<ChunkEmitter> {
        self.emitter.clone()
    }

    /// Start recording `stream`. Any previous artifact is released.
    pub fn start(&mut self, stream: &ComposedStream) -> RecorderResult<ChunkEmitter> {
        if self.state == RecorderState::Recording {
            return Err(RecorderError::AlreadyRecording);
        }
        if !stream.has_live_tracks() {
            return Err(RecorderError::NoActiveStream);
        }

        let encoder = match &self.encoder_factory {
            Some(factory) => {
                let (width, height) = stream.video().dimensions().unwrap_or((0, 0));
                let info = StreamInfo {
                    width,
                    height,
                    frame_rate: self.settings.frame_rate,
                    audio: stream.audio().map(|_| AudioInfo {
                        sample_rate: self.settings.sample_rate,
                        channels: 1,
                    }),
                };
                Some(factory.create(&info)?)
            }
            None => None,
        };
        let mime_type = match &encoder {
            Some(encoder) => encoder.mime_type().to_string(),
            None => self.settings.mime_type.clone(),
        };

        self.discard();

        let started_at = Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = ChunkEmitter::new(tx, started_at);

        if let Some(encoder) = encoder {
            self.pump = Some(EncodePump::spawn(
                stream.clone(),
                encoder,
                &self.settings,
                emitter.clone(),
            ));
        }

        self.events = Some(rx);
        self.emitter = Some(emitter.clone());
        self.mime_type = mime_type;
        self.started_at = Some(started_at);
        self.failure = None;
        self.failure_reported = false;
        self.state = RecorderState::Recording;

        tracing::info!(
            "Recorder started ({}, timeslice {}ms, encoder: {})",
            self.mime_type,
            self.settings.timeslice_ms,
            if self.pump.is_some() { "built-in" } else { "external" }
        );
        Ok(emitter)
    }

    /// Drain pending chunk events. If an encoder failure was reported the
    /// recording is halted, a partial artifact is built from the chunks
    /// received before the failure, and the failure is returned.
    pub fn poll(&mut self) -> Option<RecorderError> {
        if self.state != RecorderState::Recording {
            return None;
        }
        self.drain(false);

        let message = self.failure.clone()?;
        tracing::error!("Recording halted by encoder failure: {}", message);
        if let Some(pump) = self.pump.take() {
            pump.halt();
        }
        self.finalize();
        self.failure_reported = true;
        Some(RecorderError::EncodingFailure(message))
    }

    /// Stop recording and build the artifact. Calling it again, or before any
    /// recording, changes nothing.
    pub fn stop(&mut self) -> Option<&RecordingArtifact> {
        if self.state != RecorderState::Recording {
            return self.artifact.as_ref();
        }

        if let Some(pump) = self.pump.take() {
            let encoder = pump.halt();
            let tail = encoder.lock().finish();
            match tail {
                Ok(bytes) => {
                    if let Some(emitter) = &self.emitter {
                        let _ = emitter.emit(bytes);
                    }
                }
                Err(e) => {
                    tracing::error!("Encoder failed while finishing: {}", e);
                    if let Some(emitter) = &self.emitter {
                        let _ = emitter.fail(e.to_string());
                    }
                }
            }
        }

        self.finalize();
        self.artifact.as_ref()
    }

    /// Halt any recording, clear the buffer and release the artifact
    pub fn reset(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.halt();
        }
        self.emitter = None;
        if let Some(mut events) = self.events.take() {
            events.close();
        }
        self.discard();
        self.started_at = None;
        self.failure = None;
        self.failure_reported = false;
        self.state = RecorderState::Inactive;
    }

    fn discard(&mut self) {
        self.chunks.clear();
        self.chunk_count = 0;
        if let Some(artifact) = self.artifact.take() {
            self.registry.revoke(artifact.handle().url());
        }
    }

    fn drain(&mut self, close: bool) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        if close {
            events.close();
        }
        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        for event in received {
            self.accept(event);
        }
    }

    fn accept(&mut self, event: ChunkEvent) {
        match event {
            // Chunks after a failure are not part of the recording
            ChunkEvent::Data { .. } if self.failure.is_some() => {}
            ChunkEvent::Data { data, offset } => {
                self.chunks.push(Chunk {
                    sequence: self.chunk_count,
                    offset,
                    data,
                });
                self.chunk_count += 1;
            }
            ChunkEvent::Failed(message) => {
                if self.failure.is_none() {
                    self.failure = Some(message);
                }
            }
        }
    }

    fn finalize(&mut self) {
        self.emitter = None;
        self.drain(true);
        self.events = None;

        let duration = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        let artifact = RecordingArtifact::assemble(
            std::mem::take(&mut self.chunks),
            &self.mime_type,
            &self.registry,
            duration,
            self.failure.is_some(),
        );
        tracing::info!(
            "Recorder stopped: {} chunk(s), {} bytes{}",
            artifact.chunk_count(),
            artifact.len(),
            if artifact.is_partial() { " (partial)" } else { "" }
        );

        self.artifact = Some(artifact);
        self.state = RecorderState::Stopped;
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.halt();
        }
    }
}
