//! Recording
//!
//! This module turns a composed stream into a recording:
//! - ChunkEmitter, the channel encoders push chunks through
//! - EncodePump, the built-in encoder loop
//! - Recorder, which buffers chunks and finalizes the artifact
//! - ContentRegistry and RecordingArtifact for the result

pub mod artifact;
pub mod chunk;
pub mod media_recorder;
mod pump;
pub mod state;

pub use artifact::{ArtifactInfo, ContentHandle, ContentRegistry, RecordingArtifact};
pub use chunk::{Chunk, ChunkEmitter, ChunkEvent};
pub use media_recorder::Recorder;
pub use state::RecorderState;
