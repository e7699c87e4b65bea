// Test doubles for the bridge's device and session seams.
//
// Everything records into shared state so a test can inspect what the
// bridge did after handing ownership of the doubles over.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::mpsc;

use live_audio_bridge::audio::{
    AudioCapture, AudioPlayback, DeviceHandle, EncodedFrame, InputContext, OutputContext,
    PlaybackBuffer, ScheduledSource,
};
use live_audio_bridge::error::BridgeError;
use live_audio_bridge::session::{
    DuplexSession, InlineAudio, LiveConnector, ServerContent, SessionEvent,
};

/// Manually advanced output clock, in seconds.
#[derive(Clone, Default)]
pub struct Clock(Arc<Mutex<f64>>);

impl Clock {
    pub fn now(&self) -> f64 {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, t: f64) {
        *self.0.lock().unwrap() = t;
    }
}

// ---------------------------------------------------------------- capture

#[derive(Default)]
pub struct CaptureState {
    pub opened: usize,
    pub started: bool,
    pub released: usize,
    pub sender: Option<mpsc::Sender<Vec<f32>>>,
    pub fail_open: bool,
}

#[derive(Clone, Default)]
pub struct MockCapture(pub Arc<Mutex<CaptureState>>);

impl MockCapture {
    pub fn failing() -> Self {
        let capture = Self::default();
        capture.0.lock().unwrap().fail_open = true;
        capture
    }

    /// Push one microphone buffer as if the device produced it.
    pub async fn push(&self, buffer: Vec<f32>) {
        let sender = self.0.lock().unwrap().sender.clone();
        sender
            .expect("input not open")
            .send(buffer)
            .await
            .expect("bridge dropped the input");
    }

    pub fn close_stream(&self) {
        self.0.lock().unwrap().sender = None;
    }

    pub fn held(&self) -> bool {
        let state = self.0.lock().unwrap();
        state.opened > state.released
    }
}

struct MockHandle(Arc<Mutex<CaptureState>>, bool);

impl DeviceHandle for MockHandle {
    fn start(&mut self) -> Result<(), BridgeError> {
        self.0.lock().unwrap().started = true;
        Ok(())
    }

    fn release(&mut self) {
        if !self.1 {
            self.1 = true;
            let mut state = self.0.lock().unwrap();
            state.released += 1;
            state.sender = None;
        }
    }
}

impl AudioCapture for MockCapture {
    fn open_input(
        &mut self,
        _sample_rate: u32,
        _frame_size: usize,
    ) -> Result<InputContext, BridgeError> {
        let mut state = self.0.lock().unwrap();
        if state.fail_open {
            return Err(BridgeError::DeviceAccess("microphone permission denied".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        state.opened += 1;
        state.sender = Some(tx);
        Ok(InputContext::new(rx, Box::new(MockHandle(self.0.clone(), false))))
    }
}

// ---------------------------------------------------------------- playback

#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub start: f64,
    pub duration: f64,
    pub stopped: bool,
}

#[derive(Default)]
pub struct PlaybackState {
    pub opened: usize,
    pub closed: usize,
    pub scheduled: Vec<Scheduled>,
}

#[derive(Clone)]
pub struct MockPlayback {
    pub state: Arc<Mutex<PlaybackState>>,
    pub clock: Clock,
}

impl MockPlayback {
    pub fn new(clock: Clock) -> Self {
        Self {
            state: Arc::default(),
            clock,
        }
    }

    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn held(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.opened > state.closed
    }
}

impl AudioPlayback for MockPlayback {
    fn open_output(
        &mut self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn OutputContext>, BridgeError> {
        self.state.lock().unwrap().opened += 1;
        Ok(Box::new(MockOutput {
            state: self.state.clone(),
            clock: self.clock.clone(),
            sample_rate,
            channels,
            closed: false,
        }))
    }
}

struct MockOutput {
    state: Arc<Mutex<PlaybackState>>,
    clock: Clock,
    sample_rate: u32,
    channels: u16,
    closed: bool,
}

impl OutputContext for MockOutput {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Box<dyn ScheduledSource> {
        let mut state = self.state.lock().unwrap();
        state.scheduled.push(Scheduled {
            start: start_at,
            duration: buffer.duration(),
            stopped: false,
        });
        Box::new(MockSource {
            state: self.state.clone(),
            index: state.scheduled.len() - 1,
            end: start_at + buffer.duration(),
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().closed += 1;
        }
    }
}

struct MockSource {
    state: Arc<Mutex<PlaybackState>>,
    index: usize,
    end: f64,
}

impl ScheduledSource for MockSource {
    fn stop(&mut self) {
        self.state.lock().unwrap().scheduled[self.index].stopped = true;
    }

    fn end_time(&self) -> f64 {
        self.end
    }
}

// ---------------------------------------------------------------- session

#[derive(Default)]
pub struct SessionState {
    pub events: Option<mpsc::UnboundedSender<SessionEvent>>,
    pub sent: Vec<EncodedFrame>,
    pub closed: usize,
    pub fail_connect: bool,
    pub fail_send: bool,
}

#[derive(Clone, Default)]
pub struct MockConnector(pub Arc<Mutex<SessionState>>);

impl MockConnector {
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.0.lock().unwrap().fail_connect = true;
        connector
    }

    /// Deliver a session event. Returns false if the bridge no longer listens.
    pub fn emit(&self, event: SessionEvent) -> bool {
        match self.0.lock().unwrap().events.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<EncodedFrame> {
        self.0.lock().unwrap().sent.clone()
    }

    pub fn closed(&self) -> usize {
        self.0.lock().unwrap().closed
    }

    pub fn fail_sends(&self) {
        self.0.lock().unwrap().fail_send = true;
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Box<dyn DuplexSession>> {
        let mut state = self.0.lock().unwrap();
        if state.fail_connect {
            anyhow::bail!("network unreachable");
        }
        state.events = Some(events);
        Ok(Box::new(MockSession(self.0.clone())))
    }
}

struct MockSession(Arc<Mutex<SessionState>>);

impl DuplexSession for MockSession {
    fn send(&self, frame: EncodedFrame) -> anyhow::Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.fail_send {
            anyhow::bail!("socket reset");
        }
        state.sent.push(frame);
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.0.lock().unwrap().closed += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------- payloads

/// Base64 payload of `frames` silent mono samples.
pub fn silence(frames: usize) -> String {
    STANDARD.encode(vec![0u8; frames * 2])
}

pub fn audio_message(frames: usize, rate: u32) -> SessionEvent {
    SessionEvent::Message(ServerContent {
        audio: Some(InlineAudio {
            mime_type: format!("audio/pcm;rate={}", rate),
            data: silence(frames),
        }),
        ..Default::default()
    })
}

pub fn interruption() -> SessionEvent {
    SessionEvent::Message(ServerContent {
        interrupted: true,
        ..Default::default()
    })
}
