//! Chunk emission
//!
//! Encoded data reaches the recorder through an unbounded channel. Whoever
//! encodes (the built-in pump or an external platform encoder) holds a
//! `ChunkEmitter`; the recorder drains the receiving end in order.

use crate::utils::error::{RecorderError, RecorderResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A buffered fragment of encoded media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in emission order, starting at zero
    pub sequence: u64,
    /// Time since the recording started when the chunk was emitted
    pub offset: Duration,
    pub data: Vec<u8>,
}

/// Message sent from an encoder to the recorder
#[derive(Debug)]
pub enum ChunkEvent {
    Data { data: Vec<u8>, offset: Duration },
    Failed(String),
}

/// Sending half of a recording's chunk channel
#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    tx: mpsc::UnboundedSender<ChunkEvent>,
    started_at: Instant,
}

impl ChunkEmitter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ChunkEvent>, started_at: Instant) -> Self {
        Self { tx, started_at }
    }

    /// Hand a chunk to the recorder. Empty chunks are dropped.
    pub fn emit(&self, data: Vec<u8>) -> RecorderResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let offset = self.started_at.elapsed();
        self.tx
            .send(ChunkEvent::Data { data, offset })
            .map_err(|_| RecorderError::NotRecording)
    }

    /// Report that encoding broke; the recorder keeps what it already has
    pub fn fail(&self, message: impl Into<String>) -> RecorderResult<()> {
        self.tx
            .send(ChunkEvent::Failed(message.into()))
            .map_err(|_| RecorderError::NotRecording)
    }

    /// Whether the recording this emitter belongs to has ended
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
