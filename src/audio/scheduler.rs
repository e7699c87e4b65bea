//! Gapless playback scheduling against an output clock.
//!
//! Every chunk starts at `max(next_start_time, now)` and pushes
//! `next_start_time` forward by its own duration, so consecutive chunks
//! abut exactly while the clock keeps up, and a late chunk snaps to the
//! live clock instead of compounding the delay.

use super::device::{OutputContext, ScheduledSource};
use super::frame::PlaybackBuffer;

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub start: f64,
    pub duration: f64,
}

impl Placement {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    next_start_time: f64,
    active: Vec<Box<dyn ScheduledSource>>,
    lag_warn_secs: f64,
    lag_warnings: u64,
}

impl PlaybackScheduler {
    pub fn new(lag_warn_secs: f64) -> Self {
        Self {
            next_start_time: 0.0,
            active: Vec::new(),
            lag_warn_secs,
            lag_warnings: 0,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// How many chunks were queued further ahead of the clock than the warning threshold.
    pub fn lag_warnings(&self) -> u64 {
        self.lag_warnings
    }

    /// Scheduled sources that have not finished playing yet.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn schedule(&mut self, output: &mut dyn OutputContext, buffer: PlaybackBuffer) -> Placement {
        let now = output.current_time();
        self.active.retain(|source| source.end_time() > now);

        let start = self.next_start_time.max(now);
        let duration = buffer.duration();
        let source = output.schedule(buffer, start);
        self.active.push(source);
        self.next_start_time = start + duration;

        // Nothing bounds how far ahead the queue may run; a faster-than-real-time
        // sender keeps growing it until the next interruption.
        let lag = self.next_start_time - now;
        if self.lag_warn_secs > 0.0 && lag > self.lag_warn_secs {
            self.lag_warnings += 1;
            log::warn!("Playback queue is {:.2}s ahead of the output clock", lag);
        }

        Placement { start, duration }
    }

    /// Stop everything queued or playing and restart the schedule from the
    /// live clock on the next chunk. Returns how many sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for mut source in self.active.drain(..) {
            source.stop();
        }
        self.next_start_time = 0.0;
        stopped
    }
}
