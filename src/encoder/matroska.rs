//! Live Matroska writer
//!
//! Writes a streaming Matroska file: the header (EBML header, an
//! unknown-size Segment, Info and Tracks) goes out with the first cluster,
//! and every flush turns the buffered frames into Clusters of SimpleBlocks.
//! Concatenating all flushed bytes in order yields a complete file.
//!
//! Video is stored as raw RGBA, audio as 32-bit float PCM. The same stream
//! is what the FFmpeg encoder reads on its stdin.

use super::ebml::{encode_vint, ids, EbmlWriter};
use super::{MediaEncoder, StreamInfo};
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use std::time::Duration;
use uuid::Uuid;

pub const MIME_TYPE: &str = "video/x-matroska";

pub const VIDEO_TRACK: u64 = 1;
pub const AUDIO_TRACK: u64 = 2;

/// Nanoseconds per timestamp tick (one millisecond)
const TIMESTAMP_SCALE: u64 = 1_000_000;

const MAX_RELATIVE_MS: u64 = i16::MAX as u64;

#[derive(Debug)]
struct Block {
    track: u64,
    timestamp_ms: u64,
    data: Vec<u8>,
}

/// Incremental Matroska muxer
#[derive(Debug)]
pub struct MatroskaMuxer {
    info: StreamInfo,
    header_written: bool,
    finished: bool,
    pending: Vec<Block>,
    clusters_written: u64,
    video_uid: u64,
    audio_uid: u64,
}

fn track_uid() -> u64 {
    Uuid::new_v4().as_u64_pair().0 | 1
}

fn timestamp_ms(timestamp: Duration) -> u64 {
    timestamp.as_millis() as u64
}

impl MatroskaMuxer {
    pub fn new(info: StreamInfo) -> Self {
        Self {
            info,
            header_written: false,
            finished: false,
            pending: Vec::new(),
            clusters_written: 0,
            video_uid: track_uid(),
            audio_uid: track_uid(),
        }
    }

    pub fn clusters_written(&self) -> u64 {
        self.clusters_written
    }

    fn ensure_open(&self) -> RecorderResult<()> {
        if self.finished {
            return Err(RecorderError::EncodingFailure(
                "muxer already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn write_header(&self, w: &mut EbmlWriter) {
        w.master(ids::EBML, |h| {
            h.uint(ids::EBML_VERSION, 1);
            h.uint(ids::EBML_READ_VERSION, 1);
            h.uint(ids::EBML_MAX_ID_LENGTH, 4);
            h.uint(ids::EBML_MAX_SIZE_LENGTH, 8);
            h.string(ids::DOC_TYPE, "matroska");
            h.uint(ids::DOC_TYPE_VERSION, 4);
            h.uint(ids::DOC_TYPE_READ_VERSION, 2);
        });

        w.open_unknown(ids::SEGMENT);

        w.master(ids::INFO, |i| {
            i.uint(ids::TIMESTAMP_SCALE, TIMESTAMP_SCALE);
            i.string(ids::MUXING_APP, "open-recorder");
            i.string(
                ids::WRITING_APP,
                &format!("open-recorder {}", env!("CARGO_PKG_VERSION")),
            );
        });

        w.master(ids::TRACKS, |t| {
            t.master(ids::TRACK_ENTRY, |e| {
                e.uint(ids::TRACK_NUMBER, VIDEO_TRACK);
                e.uint(ids::TRACK_UID, self.video_uid);
                e.uint(ids::TRACK_TYPE, 1);
                e.uint(ids::FLAG_LACING, 0);
                e.string(ids::CODEC_ID, "V_UNCOMPRESSED");
                e.master(ids::VIDEO, |v| {
                    v.uint(ids::PIXEL_WIDTH, self.info.width as u64);
                    v.uint(ids::PIXEL_HEIGHT, self.info.height as u64);
                    v.binary(ids::COLOUR_SPACE, b"RGBA");
                });
            });

            if let Some(audio) = &self.info.audio {
                t.master(ids::TRACK_ENTRY, |e| {
                    e.uint(ids::TRACK_NUMBER, AUDIO_TRACK);
                    e.uint(ids::TRACK_UID, self.audio_uid);
                    e.uint(ids::TRACK_TYPE, 2);
                    e.uint(ids::FLAG_LACING, 0);
                    e.string(ids::CODEC_ID, "A_PCM/FLOAT/IEEE");
                    e.master(ids::AUDIO, |a| {
                        a.float(ids::SAMPLING_FREQUENCY, audio.sample_rate as f64);
                        a.uint(ids::CHANNELS, audio.channels as u64);
                        a.uint(ids::BIT_DEPTH, 32);
                    });
                });
            }
        });
    }

    fn write_clusters(&mut self, w: &mut EbmlWriter, mut blocks: Vec<Block>) {
        blocks.sort_by_key(|b| b.timestamp_ms);

        let mut start = 0;
        while start < blocks.len() {
            let cluster_ms = blocks[start].timestamp_ms;
            let end = blocks[start..]
                .iter()
                .position(|b| b.timestamp_ms - cluster_ms > MAX_RELATIVE_MS)
                .map_or(blocks.len(), |offset| start + offset);

            w.master(ids::CLUSTER, |c| {
                c.uint(ids::TIMESTAMP, cluster_ms);
                for block in &blocks[start..end] {
                    c.binary(ids::SIMPLE_BLOCK, &simple_block(block, cluster_ms));
                }
            });
            self.clusters_written += 1;
            start = end;
        }
    }
}

/// SimpleBlock payload: track vint, relative timestamp, flags, data
fn simple_block(block: &Block, cluster_ms: u64) -> Vec<u8> {
    let relative = (block.timestamp_ms - cluster_ms) as i16;
    let mut out = encode_vint(block.track);
    out.extend_from_slice(&relative.to_be_bytes());
    // Every raw frame is a keyframe
    out.push(0x80);
    out.extend_from_slice(&block.data);
    out
}

impl MediaEncoder for MatroskaMuxer {
    fn mime_type(&self) -> &str {
        MIME_TYPE
    }

    fn encode_video(&mut self, frame: &Frame, timestamp: Duration) -> RecorderResult<()> {
        self.ensure_open()?;
        if frame.dimensions() != (self.info.width, self.info.height) {
            return Err(RecorderError::EncodingFailure(format!(
                "frame is {}x{}, track is {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            )));
        }
        self.pending.push(Block {
            track: VIDEO_TRACK,
            timestamp_ms: timestamp_ms(timestamp),
            data: frame.as_bytes().to_vec(),
        });
        Ok(())
    }

    fn encode_audio(&mut self, samples: &[f32], timestamp: Duration) -> RecorderResult<()> {
        self.ensure_open()?;
        if self.info.audio.is_none() {
            return Err(RecorderError::EncodingFailure(
                "stream has no audio track".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        self.pending.push(Block {
            track: AUDIO_TRACK,
            timestamp_ms: timestamp_ms(timestamp),
            data,
        });
        Ok(())
    }

    fn flush(&mut self) -> RecorderResult<Vec<u8>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let mut w = EbmlWriter::new();
        if !self.header_written {
            self.write_header(&mut w);
            self.header_written = true;
        }
        let blocks = std::mem::take(&mut self.pending);
        self.write_clusters(&mut w, blocks);
        Ok(w.into_bytes())
    }

    fn finish(&mut self) -> RecorderResult<Vec<u8>> {
        if self.finished {
            return Ok(Vec::new());
        }
        let tail = self.flush()?;
        self.finished = true;
        tracing::debug!("Matroska muxer finished after {} cluster(s)", self.clusters_written);
        Ok(tail)
    }
}
