//! Frame-indexed mixing buffer shared by the playback backends.
//!
//! Backends append segments at absolute frame positions and pull rendered
//! periods out of it; stopping a segment truncates it at the frame the
//! output clock had reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::device::ScheduledSource;

/// Current position of an output device, in frames.
pub type FrameClock = Arc<dyn Fn() -> u64 + Send + Sync>;

struct Segment {
    start_frame: u64,
    frames: u64,
    samples: Vec<f32>,
    stop_at: Arc<AtomicU64>,
}

impl Segment {
    fn end_frame(&self) -> u64 {
        (self.start_frame + self.frames).min(self.stop_at.load(Ordering::Acquire))
    }
}

pub struct Timeline {
    channels: u16,
    segments: Vec<Segment>,
}

impl Timeline {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1),
            segments: Vec::new(),
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Add interleaved samples starting at `start_frame`. The returned marker
    /// truncates the segment when a frame position is stored into it.
    pub fn add(&mut self, start_frame: u64, samples: Vec<f32>) -> Arc<AtomicU64> {
        let stop_at = Arc::new(AtomicU64::new(u64::MAX));
        let frames = (samples.len() / self.channels as usize) as u64;
        self.segments.push(Segment {
            start_frame,
            frames,
            samples,
            stop_at: stop_at.clone(),
        });
        stop_at
    }

    /// Mix every segment overlapping `[from_frame, from_frame + out.len() / channels)`
    /// into `out`, which is overwritten.
    pub fn render(&self, from_frame: u64, out: &mut [f32]) {
        let ch = self.channels as usize;
        out.iter_mut().for_each(|s| *s = 0.0);
        let to_frame = from_frame + (out.len() / ch) as u64;

        for seg in &self.segments {
            let begin = seg.start_frame.max(from_frame);
            let end = seg.end_frame().min(to_frame);
            if begin >= end {
                continue;
            }
            for frame in begin..end {
                let src = (frame - seg.start_frame) as usize * ch;
                let dst = (frame - from_frame) as usize * ch;
                for c in 0..ch {
                    out[dst + c] += seg.samples[src + c];
                }
            }
        }

        out.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
    }

    /// Drop segments that end at or before `frame`.
    pub fn prune(&mut self, frame: u64) {
        self.segments.retain(|seg| seg.end_frame() > frame);
    }

    /// Frame position at which the last audible segment finishes. Segments
    /// stopped before their start frame do not count.
    pub fn end_frame(&self) -> u64 {
        self.segments
            .iter()
            .filter(|seg| seg.end_frame() > seg.start_frame)
            .map(Segment::end_frame)
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// [`ScheduledSource`] backed by a timeline segment.
pub struct TimelineSource {
    stop_at: Arc<AtomicU64>,
    clock: FrameClock,
    end_time: f64,
}

impl TimelineSource {
    pub fn new(stop_at: Arc<AtomicU64>, clock: FrameClock, end_time: f64) -> Self {
        Self {
            stop_at,
            clock,
            end_time,
        }
    }
}

impl ScheduledSource for TimelineSource {
    fn stop(&mut self) {
        let now = (self.clock)();
        self.stop_at.fetch_min(now, Ordering::AcqRel);
    }

    fn end_time(&self) -> f64 {
        self.end_time
    }
}

/// Convert a clock position in seconds to a frame index.
pub fn seconds_to_frame(seconds: f64, sample_rate: u32) -> u64 {
    (seconds.max(0.0) * sample_rate as f64).round() as u64
}
