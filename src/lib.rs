//! Real-time duplex audio bridge to a live speech-generation service, plus a
//! small client for the request/response generation endpoints.

pub mod audio;
pub mod audio_bridge;
pub mod config;
pub mod error;
pub mod genai;
pub mod net_link;
pub mod protocol;
pub mod session;

pub use audio_bridge::{AudioBridge, BridgeCommand, BridgeConfig, BridgeEvent, SessionState};
pub use config::Config;
pub use error::BridgeError;
