//! WAV-file stand-ins for the microphone and speaker.
//!
//! Capture replays a 16-bit WAV file in fixed-size buffers, paced at real
//! time by default. Playback runs a wall-clock output clock and renders
//! everything that was scheduled into a WAV file when the context closes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::device::{
    AudioCapture, AudioPlayback, DeviceHandle, InputContext, OutputContext, ScheduledSource,
};
use super::frame::PlaybackBuffer;
use super::timeline::{FrameClock, Timeline, TimelineSource, seconds_to_frame};
use crate::error::BridgeError;

// ======================== Capture ========================

pub struct WavCapture {
    path: PathBuf,
    paced: bool,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: true,
        }
    }

    /// Deliver buffers as fast as the consumer takes them.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl AudioCapture for WavCapture {
    fn open_input(
        &mut self,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<InputContext, BridgeError> {
        let samples = read_mono(&self.path, sample_rate)
            .map_err(|e| BridgeError::DeviceAccess(format!("{:#}", e)))?;

        log::info!(
            "WAV capture: {} ({} samples, {} Hz, frame {})",
            self.path.display(),
            samples.len(),
            sample_rate,
            frame_size
        );

        let (tx, rx) = mpsc::channel(32);
        let handle = WavInputHandle {
            samples: Some(samples),
            tx: Some(tx),
            frame_size: frame_size.max(1),
            sample_rate,
            paced: self.paced,
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
        };
        Ok(InputContext::new(rx, Box::new(handle)))
    }
}

/// Read a 16-bit (or float) WAV file, averaging all channels down to mono.
fn read_mono(path: &Path, expected_rate: u32) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != expected_rate {
        anyhow::bail!(
            "{} is {} Hz, capture needs {} Hz",
            path.display(),
            spec.sample_rate,
            expected_rate
        );
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => anyhow::bail!("Unsupported WAV format: {:?} {} bit", format, bits),
    };

    let channels = spec.channels.max(1) as usize;
    Ok(interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

struct WavInputHandle {
    samples: Option<Vec<f32>>,
    tx: Option<mpsc::Sender<Vec<f32>>>,
    frame_size: usize,
    sample_rate: u32,
    paced: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle for WavInputHandle {
    fn start(&mut self) -> Result<(), BridgeError> {
        let (Some(samples), Some(tx)) = (self.samples.take(), self.tx.take()) else {
            return Ok(());
        };
        let running = self.running.clone();
        let frame_size = self.frame_size;
        let period = if self.paced {
            Duration::from_secs_f64(frame_size as f64 / self.sample_rate as f64)
        } else {
            Duration::ZERO
        };

        let handle = thread::Builder::new()
            .name("wav-capture".into())
            .spawn(move || {
                for chunk in samples.chunks(frame_size) {
                    if !period.is_zero() {
                        thread::sleep(period);
                    }
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut buffer = chunk.to_vec();
                    buffer.resize(frame_size, 0.0);
                    if tx.blocking_send(buffer).is_err() {
                        break;
                    }
                }
                log::info!("WAV capture finished");
            })
            .map_err(|e| BridgeError::DeviceAccess(format!("capture thread: {}", e)))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.samples = None;
        self.tx = None;
        // The thread notices the flag or the dropped receiver on its next buffer.
        self.thread.take();
    }
}

// ======================== Playback ========================

pub struct WavPlayback {
    path: PathBuf,
}

impl WavPlayback {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AudioPlayback for WavPlayback {
    fn open_output(
        &mut self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn OutputContext>, BridgeError> {
        if sample_rate == 0 || channels == 0 {
            return Err(BridgeError::DeviceAccess(format!(
                "invalid output format {} Hz / {} ch",
                sample_rate, channels
            )));
        }
        let opened = Instant::now();
        let clock: FrameClock =
            Arc::new(move || seconds_to_frame(opened.elapsed().as_secs_f64(), sample_rate));
        Ok(Box::new(WavOutput {
            path: self.path.clone(),
            sample_rate,
            channels,
            opened,
            clock,
            timeline: Timeline::new(channels),
            closed: false,
        }))
    }
}

struct WavOutput {
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    opened: Instant,
    clock: FrameClock,
    timeline: Timeline,
    closed: bool,
}

impl WavOutput {
    fn write_file(&self) -> Result<()> {
        let ch = self.channels as usize;
        let mut rendered = vec![0.0f32; self.timeline.end_frame() as usize * ch];
        self.timeline.render(0, &mut rendered);

        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        for sample in rendered {
            writer.write_sample((sample * 32767.0) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

impl OutputContext for WavOutput {
    fn current_time(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Box<dyn ScheduledSource> {
        let end_time = start_at + buffer.duration();
        let start_frame = seconds_to_frame(start_at, self.sample_rate);
        let marker = self.timeline.add(start_frame, buffer.samples);
        Box::new(TimelineSource::new(marker, self.clock.clone(), end_time))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.write_file() {
            Ok(()) => log::info!(
                "Wrote {:.2}s of playback to {}",
                self.timeline.end_frame() as f64 / self.sample_rate as f64,
                self.path.display()
            ),
            Err(e) => log::error!("WAV playback write failed: {:#}", e),
        }
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        self.close();
    }
}
