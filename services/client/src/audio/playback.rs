//! Track-aware playback queue.
//!
//! Synthesized speech arrives in chunks tagged with the id of the assistant
//! item it belongs to. The queue remembers how many samples of each track have
//! been handed to the output device, so an interruption can report exactly
//! where the listener stopped hearing the current track.

use parley_core::generic_types::TrackOffset;
use std::collections::{HashMap, HashSet, VecDeque};

struct Segment {
    track_id: String,
    samples: Vec<i16>,
    position: usize,
}

#[derive(Default)]
pub struct PlaybackQueue {
    segments: VecDeque<Segment>,
    played: HashMap<String, u64>,
    interrupted: HashSet<String>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a chunk of 24 kHz PCM16. Chunks of an interrupted track are
    /// dropped.
    pub fn enqueue(&mut self, track_id: &str, pcm: &[i16]) {
        if pcm.is_empty() || self.interrupted.contains(track_id) {
            return;
        }
        self.segments.push_back(Segment {
            track_id: track_id.to_string(),
            samples: pcm.to_vec(),
            position: 0,
        });
    }

    /// Next sample to play, or `None` when the queue has drained.
    pub fn next_sample(&mut self) -> Option<i16> {
        loop {
            let segment = self.segments.front_mut()?;
            if let Some(&sample) = segment.samples.get(segment.position) {
                segment.position += 1;
                *self.played.entry(segment.track_id.clone()).or_default() += 1;
                return Some(sample);
            }
            self.segments.pop_front();
        }
    }

    /// Fills `out` at the queue's own rate, padding with silence.
    pub fn fill(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self
                .next_sample()
                .map(|s| s as f32 / 32768.0)
                .unwrap_or(0.0);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stops playback. Returns the track that was playing and how many of its
    /// samples were played, or `None` when nothing was queued.
    pub fn interrupt(&mut self) -> Option<TrackOffset> {
        let current = self.segments.front()?.track_id.clone();
        for segment in self.segments.drain(..) {
            self.interrupted.insert(segment.track_id);
        }
        let sample_offset = self.played.get(&current).copied().unwrap_or(0);
        Some(TrackOffset {
            track_id: current,
            sample_offset,
        })
    }
}

/// Adapts the 24 kHz queue to the output device rate by sample-and-hold, so
/// each queue sample is counted as played exactly when it is rendered.
pub struct OutputRenderer {
    step: f64,
    phase: f64,
    current: f32,
}

impl OutputRenderer {
    pub fn new(source_rate: u32, device_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / device_rate.max(1) as f64,
            phase: 1.0,
            current: 0.0,
        }
    }

    /// Renders mono samples into `out`.
    pub fn render(&mut self, queue: &mut PlaybackQueue, out: &mut [f32]) {
        for slot in out.iter_mut() {
            while self.phase >= 1.0 {
                self.current = queue
                    .next_sample()
                    .map(|s| s as f32 / 32768.0)
                    .unwrap_or(0.0);
                self.phase -= 1.0;
            }
            *slot = self.current;
            self.phase += self.step;
        }
    }
}
