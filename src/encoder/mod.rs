//! Incremental container encoding
//!
//! An encoder buffers media pushed to it and hands back container bytes
//! whenever it is flushed. The recorder emits each flush as one chunk.
//!
//! Two encoders are built in: WebM (VP8 and Opus) through an FFmpeg child
//! process, and an in-process uncompressed Matroska writer.

pub mod ebml;
pub mod ffmpeg;
pub mod matroska;

pub use ffmpeg::{FfmpegEncoder, FfmpegEncoderFactory};
pub use matroska::MatroskaMuxer;

use crate::config::{EncoderBackend, EncoderSettings};
use crate::frame::Frame;
use crate::utils::error::RecorderResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Audio layout of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Shape of the stream an encoder is created for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub audio: Option<AudioInfo>,
}

/// Incremental container encoder
pub trait MediaEncoder: Send {
    /// Container MIME type
    fn mime_type(&self) -> &str;

    fn encode_video(&mut self, frame: &Frame, timestamp: Duration) -> RecorderResult<()>;

    fn encode_audio(&mut self, samples: &[f32], timestamp: Duration) -> RecorderResult<()>;

    /// Bytes for everything encoded since the last flush. May be empty.
    fn flush(&mut self) -> RecorderResult<Vec<u8>>;

    /// Final bytes. The encoder accepts no media afterwards.
    fn finish(&mut self) -> RecorderResult<Vec<u8>>;
}

/// Creates one encoder per recording
pub trait EncoderFactory: Send + Sync {
    fn create(&self, info: &StreamInfo) -> RecorderResult<Box<dyn MediaEncoder>>;
}

impl<F> EncoderFactory for F
where
    F: Fn(&StreamInfo) -> RecorderResult<Box<dyn MediaEncoder>> + Send + Sync,
{
    fn create(&self, info: &StreamInfo) -> RecorderResult<Box<dyn MediaEncoder>> {
        self(info)
    }
}

/// Factory for the in-process Matroska writer
#[derive(Debug, Clone, Copy, Default)]
pub struct MatroskaEncoderFactory;

impl EncoderFactory for MatroskaEncoderFactory {
    fn create(&self, info: &StreamInfo) -> RecorderResult<Box<dyn MediaEncoder>> {
        tracing::debug!(
            "Creating Matroska encoder for {}x{} @ {}fps (audio: {})",
            info.width,
            info.height,
            info.frame_rate,
            info.audio.is_some()
        );
        Ok(Box::new(MatroskaMuxer::new(info.clone())))
    }
}

/// The built-in encoder selected by the settings
pub fn factory_for(settings: &EncoderSettings) -> Arc<dyn EncoderFactory> {
    match settings.backend {
        EncoderBackend::Ffmpeg => Arc::new(FfmpegEncoderFactory::new(settings.clone())),
        EncoderBackend::Matroska => Arc::new(MatroskaEncoderFactory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_follows_backend() {
        let info = StreamInfo {
            width: 4,
            height: 4,
            frame_rate: 10,
            audio: None,
        };
        let settings = EncoderSettings {
            backend: EncoderBackend::Matroska,
            ..EncoderSettings::default()
        };
        let encoder = factory_for(&settings).create(&info).unwrap();
        assert_eq!(encoder.mime_type(), matroska::MIME_TYPE);

        let settings = EncoderSettings {
            ffmpeg_path: "/nonexistent/open-recorder-ffmpeg".to_string(),
            ..EncoderSettings::default()
        };
        assert!(matches!(
            factory_for(&settings).create(&info),
            Err(crate::utils::error::RecorderError::EncodingFailure(_))
        ));
    }
}
