//! Live sample buffering
//!
//! A device delivers interleaved samples at its own rate on its own thread;
//! the encoder pulls mono samples at the session rate. `SampleQueue` sits in
//! between, down-mixing on the way in and resampling on the way out.

use std::collections::VecDeque;

/// Seconds of audio kept before the oldest samples are dropped
const MAX_BUFFERED_SECONDS: usize = 2;

/// Mono sample FIFO at a fixed device rate
#[derive(Debug, Clone)]
pub struct SampleQueue {
    rate: u32,
    samples: VecDeque<f32>,
}

impl SampleQueue {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            samples: VecDeque::new(),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn capacity(&self) -> usize {
        self.rate.max(1) as usize * MAX_BUFFERED_SECONDS
    }

    /// Append interleaved samples, averaging the channels of each frame
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        let channels = channels.max(1);
        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().sum();
            self.samples.push_back(sum / frame.len() as f32);
        }
        let excess = self.samples.len().saturating_sub(self.capacity());
        self.samples.drain(..excess);
    }

    /// Fill `out` with samples rendered at `sample_rate`, linearly
    /// interpolated from the queue. Missing samples are silence.
    pub fn pull(&mut self, sample_rate: u32, out: &mut [f32]) {
        if out.is_empty() {
            return;
        }
        let step = self.rate as f64 / sample_rate.max(1) as f64;
        let needed = (out.len() as f64 * step).ceil() as usize;
        let available = needed.min(self.samples.len());
        let source: Vec<f32> = self.samples.drain(..available).collect();

        for (i, sample) in out.iter_mut().enumerate() {
            let position = i as f64 * step;
            let index = position.floor() as usize;
            *sample = match (source.get(index), source.get(index + 1)) {
                (Some(&a), Some(&b)) => {
                    let t = (position - index as f64) as f32;
                    a + (b - a) * t
                }
                (Some(&a), None) => a,
                _ => 0.0,
            };
        }
    }
}
