use thiserror::Error;

use crate::audio_bridge::SessionState;

/// Failures surfaced by the audio bridge.
///
/// `Decode` only ever affects a single playback chunk; every other variant
/// ends the current session and releases its devices.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("audio device unavailable: {0}")]
    DeviceAccess(String),

    #[error("live session could not be opened: {0}")]
    SessionOpen(String),

    #[error("live session failed: {0}")]
    RemoteSession(String),

    #[error("malformed playback chunk: {0}")]
    Decode(String),

    #[error("bridge is already active ({0:?})")]
    AlreadyActive(SessionState),
}
