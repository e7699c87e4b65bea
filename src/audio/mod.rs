//! audio - sample formats, device capabilities and playback scheduling
//!
//! The bridge sees devices only through the traits in [`device`]. Two
//! backends implement them: WAV files (always available) and ALSA (behind
//! the `alsa-backend` feature).

#[cfg(feature = "alsa-backend")]
mod alsa_device;
pub mod device;
pub mod frame;
pub mod scheduler;
pub mod timeline;
mod wav_device;

#[cfg(feature = "alsa-backend")]
pub use alsa_device::{AlsaCapture, AlsaPlayback};
pub use device::{
    AudioCapture, AudioPlayback, DeviceHandle, InputContext, OutputContext, ScheduledSource,
};
pub use frame::{AudioFrame, EncodedFrame, PlaybackBuffer, PlaybackChunk};
pub use scheduler::{Placement, PlaybackScheduler};
pub use wav_device::{WavCapture, WavPlayback};

use crate::config::Config;
use crate::error::BridgeError;

/// Microphone for `live`: a WAV file when given, otherwise the ALSA device.
pub fn capture_device(
    config: &Config,
    wav: Option<&std::path::Path>,
) -> Result<Box<dyn AudioCapture>, BridgeError> {
    if let Some(path) = wav {
        return Ok(Box::new(WavCapture::new(path)));
    }
    #[cfg(feature = "alsa-backend")]
    {
        Ok(Box::new(AlsaCapture::new(config.capture_device)))
    }
    #[cfg(not(feature = "alsa-backend"))]
    {
        let _ = config;
        Err(BridgeError::DeviceAccess(
            "built without ALSA support; pass a WAV file instead".into(),
        ))
    }
}

/// Speaker for `live` and `speak`: a WAV file when given, otherwise the ALSA device.
pub fn playback_device(
    config: &Config,
    wav: Option<&std::path::Path>,
) -> Result<Box<dyn AudioPlayback>, BridgeError> {
    if let Some(path) = wav {
        return Ok(Box::new(WavPlayback::new(path)));
    }
    #[cfg(feature = "alsa-backend")]
    {
        Ok(Box::new(AlsaPlayback::new(
            config.playback_device,
            config.playback_period_size,
        )))
    }
    #[cfg(not(feature = "alsa-backend"))]
    {
        let _ = config;
        Err(BridgeError::DeviceAccess(
            "built without ALSA support; pass a WAV file instead".into(),
        ))
    }
}
