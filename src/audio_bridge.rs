//! Duplex audio bridge for one live session.
//!
//! Microphone buffers are encoded and sent in capture order; synthesized
//! audio coming back is decoded and scheduled back-to-back on the output
//! clock. Everything runs on a single task: each capture buffer and each
//! session event is handled to completion before the next one, so the
//! schedule and the active-source set need no locking.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::frame::{mime_channels, mime_rate};
use crate::audio::{
    AudioCapture, AudioFrame, AudioPlayback, InputContext, OutputContext, PlaybackChunk,
    PlaybackScheduler,
};
use crate::config::Config;
use crate::error::BridgeError;
use crate::session::{DuplexSession, LiveConnector, ServerContent, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Error,
}

/// Notifications for whoever drives the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    State(SessionState),
    Error(BridgeError),
    Interrupted { stopped: usize },
    TurnComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Start,
    Stop,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub output_channels: u16,
    /// Samples per capture buffer
    pub frame_size: usize,
    /// Warn once queued playback runs this far ahead of the clock (0 disables)
    pub lag_warn_secs: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            output_channels: 1,
            frame_size: 4096,
            lag_warn_secs: 0.0,
        }
    }
}

impl From<&Config> for BridgeConfig {
    fn from(config: &Config) -> Self {
        Self {
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            output_channels: config.channels,
            frame_size: config.frame_size,
            lag_warn_secs: config.lag_warn_secs,
        }
    }
}

/// Running totals for one bridge instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames_sent: u64,
    pub chunks_scheduled: u64,
    pub chunks_skipped: u64,
    pub interruptions: u64,
}

pub struct AudioBridge {
    config: BridgeConfig,
    connector: Arc<dyn LiveConnector>,
    capture: Box<dyn AudioCapture>,
    playback: Box<dyn AudioPlayback>,
    notify: mpsc::UnboundedSender<BridgeEvent>,

    state: SessionState,
    session: Option<Box<dyn DuplexSession>>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    input: Option<InputContext>,
    output: Option<Box<dyn OutputContext>>,
    scheduler: PlaybackScheduler,
    stats: BridgeStats,
}

impl AudioBridge {
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn LiveConnector>,
        capture: Box<dyn AudioCapture>,
        playback: Box<dyn AudioPlayback>,
        notify: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        let scheduler = PlaybackScheduler::new(config.lag_warn_secs);
        Self {
            config,
            connector,
            capture,
            playback,
            notify,
            state: SessionState::Idle,
            session: None,
            events: None,
            input: None,
            output: None,
            scheduler,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// True while any device or output context is held.
    pub fn holds_resources(&self) -> bool {
        self.input.is_some() || self.output.is_some() || self.session.is_some()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::info!("Bridge state: {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.notify.send(BridgeEvent::State(state));
        }
    }

    fn report(&self, error: BridgeError) {
        log::error!("{}", error);
        let _ = self.notify.send(BridgeEvent::Error(error));
    }

    /// Acquire devices and begin opening a session. Returns once the attempt
    /// is under way; `Open` arrives later as a session event.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Error) {
            return Err(BridgeError::AlreadyActive(self.state));
        }

        let (input, output) = match self.open_devices() {
            Ok(devices) => devices,
            Err(e) => {
                // nothing is held, so a retry after a failed session lands back in Idle
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };
        self.input = Some(input);
        self.output = Some(output);
        self.scheduler = PlaybackScheduler::new(self.config.lag_warn_secs);

        self.set_state(SessionState::Connecting);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        match self.connector.connect(events_tx).await {
            Ok(session) => {
                self.session = Some(session);
                self.events = Some(events_rx);
                Ok(())
            }
            Err(e) => {
                let error = BridgeError::SessionOpen(format!("{:#}", e));
                self.fail(error.clone());
                Err(error)
            }
        }
    }

    fn open_devices(&mut self) -> Result<(InputContext, Box<dyn OutputContext>), BridgeError> {
        let input = self
            .capture
            .open_input(self.config.input_sample_rate, self.config.frame_size)?;
        // Input is released by drop if the output side fails.
        let output = self
            .playback
            .open_output(self.config.output_sample_rate, self.config.output_channels)?;
        Ok((input, output))
    }

    /// Tear down whatever is held and return to `Idle`. Safe in every state.
    pub fn stop(&mut self) {
        let was = self.state;
        if matches!(was, SessionState::Connecting | SessionState::Open) {
            self.set_state(SessionState::Closing);
        }
        let session = self.session.take();
        self.release();
        if let Some(session) = session {
            if let Err(e) = session.close() {
                log::warn!("Session close failed: {:#}", e);
            }
        }
        self.set_state(SessionState::Idle);
    }

    fn release(&mut self) {
        self.events = None;
        if let Some(input) = self.input.take() {
            input.release();
        }
        let stopped = self.scheduler.interrupt();
        if stopped > 0 {
            log::debug!("Discarded {} scheduled sources", stopped);
        }
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }

    fn fail(&mut self, error: BridgeError) {
        let session = self.session.take();
        self.release();
        if let Some(session) = session {
            let _ = session.close();
        }
        self.report(error);
        self.set_state(SessionState::Error);
    }

    /// Encode one capture buffer and hand it to the session.
    pub fn handle_capture(&mut self, buffer: Vec<f32>) {
        if self.state != SessionState::Open {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let frame = AudioFrame::from_f32(&buffer, self.config.input_sample_rate).encode();
        match session.send(frame) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(e) => self.fail(BridgeError::RemoteSession(format!("{:#}", e))),
        }
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match (self.state, event) {
            (SessionState::Connecting, SessionEvent::Open) => {
                if let Some(input) = self.input.as_mut() {
                    if let Err(e) = input.start() {
                        self.fail(e);
                        return;
                    }
                }
                self.set_state(SessionState::Open);
            }
            (SessionState::Open, SessionEvent::Message(content)) => self.handle_content(content),
            (SessionState::Connecting, SessionEvent::Error(e)) => {
                self.fail(BridgeError::SessionOpen(e))
            }
            (SessionState::Connecting, SessionEvent::Close(reason)) => self.fail(
                BridgeError::SessionOpen(reason.unwrap_or_else(|| "closed before open".into())),
            ),
            (SessionState::Open, SessionEvent::Error(e)) => {
                self.fail(BridgeError::RemoteSession(e))
            }
            (SessionState::Open, SessionEvent::Close(reason)) => {
                log::info!(
                    "Remote closed the session: {}",
                    reason.as_deref().unwrap_or("-")
                );
                self.stop();
            }
            (state, event) => log::debug!("Ignoring {:?} in state {:?}", event, state),
        }
    }

    fn handle_content(&mut self, content: ServerContent) {
        if let Some(audio) = content.audio {
            let rate = mime_rate(&audio.mime_type).unwrap_or(self.config.output_sample_rate);
            let channels =
                mime_channels(&audio.mime_type).unwrap_or(self.config.output_channels);
            match PlaybackChunk::from_base64(&audio.data, rate, channels)
                .and_then(|chunk| self.schedule_chunk(chunk))
            {
                Ok(()) => self.stats.chunks_scheduled += 1,
                Err(e) => {
                    self.stats.chunks_skipped += 1;
                    log::warn!("Skipping playback chunk: {}", e);
                    let _ = self.notify.send(BridgeEvent::Error(e));
                }
            }
        }

        if content.interrupted {
            let stopped = self.scheduler.interrupt();
            self.stats.interruptions += 1;
            log::info!("Interrupted, stopped {} sources", stopped);
            let _ = self.notify.send(BridgeEvent::Interrupted { stopped });
        }

        if content.turn_complete {
            let _ = self.notify.send(BridgeEvent::TurnComplete);
        }
    }

    fn schedule_chunk(&mut self, chunk: PlaybackChunk) -> Result<(), BridgeError> {
        let Some(output) = self.output.as_mut() else {
            return Err(BridgeError::Decode("no output context".into()));
        };
        if chunk.sample_rate != output.sample_rate() || chunk.channels != output.channels() {
            return Err(BridgeError::Decode(format!(
                "chunk is {} Hz / {} ch, output plays {} Hz / {} ch",
                chunk.sample_rate,
                chunk.channels,
                output.sample_rate(),
                output.channels()
            )));
        }
        if chunk.samples.is_empty() {
            return Ok(());
        }
        self.scheduler.schedule(output.as_mut(), chunk.to_buffer());
        Ok(())
    }

    /// Block until a command, a session event or a capture buffer is ready.
    /// Only mpsc receives are raced, so losing a branch drops nothing.
    async fn wait(&mut self, commands: Option<&mut mpsc::Receiver<BridgeCommand>>) -> Wake {
        let capture_live = self.state == SessionState::Open && self.input.is_some();
        let events = self.events.as_mut();
        let input = self.input.as_mut();
        tokio::select! {
            cmd = recv_command(commands) => Wake::Command(cmd),
            ev = recv_event(events) => Wake::Session(ev),
            buf = next_buffer(input), if capture_live => Wake::Capture(buf),
        }
    }

    fn dispatch(&mut self, wake: Wake) {
        match wake {
            Wake::Capture(Some(buffer)) => self.handle_capture(buffer),
            Wake::Capture(None) => {
                log::info!("Capture stream ended");
                if let Some(input) = self.input.as_mut() {
                    input.finish();
                }
            }
            Wake::Session(Some(event)) => self.handle_session_event(event),
            Wake::Session(None) => {
                // Transport task ended without a final event.
                self.events = None;
                self.handle_session_event(SessionEvent::Close(None));
            }
            Wake::Command(_) => {}
        }
    }

    /// Wait for the next capture buffer or session event and handle it.
    /// Returns `false` when no session is in progress.
    pub async fn step(&mut self) -> bool {
        if self.events.is_none() {
            return false;
        }
        let wake = self.wait(None).await;
        self.dispatch(wake);
        true
    }

    /// Event loop: serve start/stop commands alongside the session. Stops the
    /// bridge and returns when the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<BridgeCommand>) {
        loop {
            match self.wait(Some(&mut commands)).await {
                Wake::Command(Some(BridgeCommand::Start)) => {
                    // open failures are already reported by `start`
                    if let Err(e) = self.start().await {
                        if !matches!(e, BridgeError::SessionOpen(_)) {
                            self.report(e);
                        }
                    }
                }
                Wake::Command(Some(BridgeCommand::Stop)) => self.stop(),
                Wake::Command(None) => break,
                wake => self.dispatch(wake),
            }
        }
        self.stop();
    }
}

enum Wake {
    Command(Option<BridgeCommand>),
    Capture(Option<Vec<f32>>),
    Session(Option<SessionEvent>),
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        if self.holds_resources() {
            self.stop();
        }
    }
}

async fn recv_command(rx: Option<&mut mpsc::Receiver<BridgeCommand>>) -> Option<BridgeCommand> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_event(rx: Option<&mut mpsc::UnboundedReceiver<SessionEvent>>) -> Option<SessionEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_buffer(input: Option<&mut InputContext>) -> Option<Vec<f32>> {
    match input {
        Some(input) => input.next_buffer().await,
        None => std::future::pending().await,
    }
}
