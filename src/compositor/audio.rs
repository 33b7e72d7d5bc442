//! Audio mixing
//!
//! Every live input is summed into a single mono output track. With no input
//! there is no output track at all; the recorder then records video only.

use crate::capture::{AudioFeed, MediaTrack, TrackFeed, TrackKind, TrackOrigin};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct MixFeed {
    inputs: Vec<MediaTrack>,
    scratch: Mutex<Vec<f32>>,
}

impl AudioFeed for MixFeed {
    fn read(&self, at: Duration, sample_rate: u32, out: &mut [f32]) {
        out.fill(0.0);
        let mut scratch = self.scratch.lock();
        scratch.resize(out.len(), 0.0);

        for input in &self.inputs {
            if input.read_audio(at, sample_rate, &mut scratch) {
                for (mixed, sample) in out.iter_mut().zip(scratch.iter()) {
                    *mixed += *sample;
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Mixing graph feeding one output node
pub struct AudioMixer {
    inputs: Vec<MediaTrack>,
    output: Option<MediaTrack>,
}

impl AudioMixer {
    /// Connect the live audio tracks in `tracks`
    pub fn new(tracks: &[MediaTrack]) -> Self {
        let inputs: Vec<MediaTrack> = tracks
            .iter()
            .filter(|t| t.kind() == TrackKind::Audio && t.is_live())
            .cloned()
            .collect();

        let output = if inputs.is_empty() {
            None
        } else {
            Some(MediaTrack::derived(
                "mixed audio",
                TrackOrigin::Mixed,
                TrackFeed::Audio(Arc::new(MixFeed {
                    inputs: inputs.clone(),
                    scratch: Mutex::new(Vec::new()),
                })),
                inputs.clone(),
            ))
        };

        Self { inputs, output }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// The mixed track, absent when nothing was connected
    pub fn output(&self) -> Option<&MediaTrack> {
        self.output.as_ref()
    }
}
