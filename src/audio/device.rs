//! Capability interfaces between the bridge and real audio hardware.
//!
//! The bridge only ever talks to these traits, so its ordering and
//! scheduling logic runs unchanged against ALSA, WAV files or test doubles.

use tokio::sync::mpsc;

use super::frame::PlaybackBuffer;
use crate::error::BridgeError;

/// Microphone access.
pub trait AudioCapture: Send {
    /// Acquire the input device. Buffers of `frame_size` float samples at
    /// `sample_rate` start flowing once [`InputContext::start`] is called.
    fn open_input(&mut self, sample_rate: u32, frame_size: usize)
        -> Result<InputContext, BridgeError>;
}

/// Control half of an acquired input device.
pub trait DeviceHandle: Send {
    fn start(&mut self) -> Result<(), BridgeError>;

    /// Stop delivery and give the device back. Must be safe to call twice.
    fn release(&mut self);
}

/// An open input device plus the stream of buffers it produces.
pub struct InputContext {
    buffers: Option<mpsc::Receiver<Vec<f32>>>,
    device: Box<dyn DeviceHandle>,
    started: bool,
}

impl InputContext {
    pub fn new(buffers: mpsc::Receiver<Vec<f32>>, device: Box<dyn DeviceHandle>) -> Self {
        Self {
            buffers: Some(buffers),
            device,
            started: false,
        }
    }

    pub fn start(&mut self) -> Result<(), BridgeError> {
        if !self.started {
            self.device.start()?;
            self.started = true;
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Wait for the next captured buffer. Pending forever once the device
    /// has run dry or has not been started.
    pub async fn next_buffer(&mut self) -> Option<Vec<f32>> {
        match (self.started, self.buffers.as_mut()) {
            (true, Some(rx)) => rx.recv().await,
            _ => std::future::pending().await,
        }
    }

    /// Mark the stream exhausted; the device stays held until release.
    pub fn finish(&mut self) {
        self.buffers = None;
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for InputContext {
    fn drop(&mut self) {
        self.buffers = None;
        self.device.release();
    }
}

/// Speaker access.
pub trait AudioPlayback: Send {
    fn open_output(
        &mut self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn OutputContext>, BridgeError>;
}

/// A running output clock that accepts timed buffers.
pub trait OutputContext: Send {
    /// Seconds elapsed on the output clock since the context opened.
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Queue `buffer` to begin playing at `start_at` seconds on the output clock.
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Box<dyn ScheduledSource>;

    /// Stop the clock and release the device.
    fn close(&mut self);
}

/// Handle to one scheduled buffer.
pub trait ScheduledSource: Send {
    fn stop(&mut self);

    /// Output-clock time at which the buffer finishes.
    fn end_time(&self) -> f64;
}
