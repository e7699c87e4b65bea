//! ALSA PCM devices behind the capture and playback capabilities.
//!
//! Both directions run in dedicated OS threads (not tokio tasks) so real-time
//! audio I/O never contends with the network side:
//!
//! - Capture thread: ALSA read → float conversion → fixed-size buffers → channel
//! - Playback thread: timeline render → ALSA write; its frame count is the output clock

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::{self, JoinHandle};

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::device::{
    AudioCapture, AudioPlayback, DeviceHandle, InputContext, OutputContext, ScheduledSource,
};
use super::frame::PlaybackBuffer;
use super::timeline::{FrameClock, Timeline, TimelineSource, seconds_to_frame};
use crate::error::BridgeError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let dir_name = match direction {
        Direction::Capture => "Capture",
        Direction::Playback => "Playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if params.sample_rate != sample_rate || params.channels != channels {
        anyhow::bail!(
            "{} device '{}' negotiated {} Hz / {} ch, need {} Hz / {} ch",
            dir_name,
            device,
            params.sample_rate,
            params.channels,
            sample_rate,
            channels
        );
    }

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

// ======================== Capture ========================

pub struct AlsaCapture {
    device: String,
}

impl AlsaCapture {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl AudioCapture for AlsaCapture {
    fn open_input(
        &mut self,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<InputContext, BridgeError> {
        let (tx, rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
        let (start_tx, start_rx) = std_mpsc::channel::<()>();
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let device = self.device.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    let (pcm, params) = match open_pcm(
                        &device,
                        Direction::Capture,
                        sample_rate,
                        1,
                        None,
                    ) {
                        Ok(opened) => {
                            let _ = ready_tx.send(Ok(()));
                            opened
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };
                    // Wait for the session to open; a dropped sender means release.
                    if start_rx.recv().is_err() {
                        return;
                    }
                    if let Err(e) = record_loop(&pcm, &params, frame_size, tx, &running) {
                        log::error!("Recording thread error: {}", e);
                    }
                })
                .map_err(|e| BridgeError::DeviceAccess(format!("capture thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::DeviceAccess(e)),
            Err(_) => {
                return Err(BridgeError::DeviceAccess(
                    "capture thread exited during setup".into(),
                ));
            }
        }

        let handle = AlsaInputHandle {
            start_tx: Some(start_tx),
            running,
            thread: Some(thread),
        };
        Ok(InputContext::new(rx, Box::new(handle)))
    }
}

fn record_loop(
    pcm: &PCM,
    params: &AlsaParams,
    frame_size: usize,
    tx: mpsc::Sender<Vec<f32>>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut read_buf = vec![0i16; params.period_size];
    let mut accum_buf: Vec<f32> = Vec::with_capacity(frame_size * 2);

    log::info!(
        "Recording started: rate={}, period={}, frame_size={}",
        params.sample_rate,
        params.period_size,
        frame_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                accum_buf.extend(read_buf[..frames].iter().map(|&s| s as f32 / 32768.0));

                while accum_buf.len() >= frame_size {
                    let buffer: Vec<f32> = accum_buf.drain(..frame_size).collect();
                    if tx.blocking_send(buffer).is_err() {
                        log::warn!("Capture receiver dropped");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}

struct AlsaInputHandle {
    start_tx: Option<std_mpsc::Sender<()>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle for AlsaInputHandle {
    fn start(&mut self) -> Result<(), BridgeError> {
        match &self.start_tx {
            Some(start_tx) => start_tx
                .send(())
                .map_err(|_| BridgeError::DeviceAccess("capture thread has exited".into())),
            None => Err(BridgeError::DeviceAccess("capture already released".into())),
        }
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.start_tx = None;
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }
}

// ======================== Playback ========================

pub struct AlsaPlayback {
    device: String,
    period_size: Option<usize>,
}

impl AlsaPlayback {
    /// `period_size` of 0 lets ALSA decide.
    pub fn new(device: impl Into<String>, period_size: usize) -> Self {
        Self {
            device: device.into(),
            period_size: (period_size > 0).then_some(period_size),
        }
    }
}

impl AudioPlayback for AlsaPlayback {
    fn open_output(
        &mut self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn OutputContext>, BridgeError> {
        let timeline = Arc::new(Mutex::new(Timeline::new(channels)));
        let frames = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);

        let thread = {
            let device = self.device.clone();
            let period_size = self.period_size;
            let timeline = timeline.clone();
            let frames = frames.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    let (pcm, params) = match open_pcm(
                        &device,
                        Direction::Playback,
                        sample_rate,
                        channels as u32,
                        period_size,
                    ) {
                        Ok(opened) => {
                            let _ = ready_tx.send(Ok(()));
                            opened
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };
                    if let Err(e) = play_loop(&pcm, &params, &timeline, &frames, &running) {
                        log::error!("Playback thread error: {}", e);
                    }
                })
                .map_err(|e| BridgeError::DeviceAccess(format!("playback thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::DeviceAccess(e)),
            Err(_) => {
                return Err(BridgeError::DeviceAccess(
                    "playback thread exited during setup".into(),
                ));
            }
        }

        let clock: FrameClock = {
            let frames = frames.clone();
            Arc::new(move || frames.load(Ordering::Acquire))
        };

        Ok(Box::new(AlsaOutput {
            timeline,
            frames,
            clock,
            sample_rate,
            channels,
            running,
            thread: Some(thread),
        }))
    }
}

fn play_loop(
    pcm: &PCM,
    params: &AlsaParams,
    timeline: &Mutex<Timeline>,
    frames: &AtomicU64,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let ch = params.channels as usize;
    let mut mix_buf = vec![0f32; params.period_size * ch];
    let mut pcm_buf = vec![0i16; params.period_size * ch];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        let position = frames.load(Ordering::Acquire);
        {
            let mut timeline = match timeline.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            timeline.prune(position);
            timeline.render(position, &mut mix_buf);
        }
        for (dst, src) in pcm_buf.iter_mut().zip(&mix_buf) {
            *dst = (src * 32767.0) as i16;
        }

        // Retry short writes and XRUNs without losing frames; give up on the
        // period after repeated failures instead of spinning.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < params.period_size {
            match io.writei(&pcm_buf[frames_written * ch..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Ok(());
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries reached, dropping {} frames",
                            params.period_size - frames_written
                        );
                        break;
                    }
                }
            }
        }
        frames.fetch_add(params.period_size as u64, Ordering::AcqRel);
    }

    let _ = pcm.drain();
    log::info!("Playback stopped");
    Ok(())
}

struct AlsaOutput {
    timeline: Arc<Mutex<Timeline>>,
    frames: Arc<AtomicU64>,
    clock: FrameClock,
    sample_rate: u32,
    channels: u16,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputContext for AlsaOutput {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
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
        let marker = match self.timeline.lock() {
            Ok(mut timeline) => timeline.add(start_frame, buffer.samples),
            Err(poisoned) => poisoned.into_inner().add(start_frame, buffer.samples),
        };
        Box::new(TimelineSource::new(marker, self.clock.clone(), end_time))
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.close();
    }
}
