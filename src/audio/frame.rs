//! Sample containers and the PCM conversions used on both directions of a
//! live session.
//!
//! - Capture: `[-1, 1]` float buffer → `AudioFrame` (i16) → `EncodedFrame` (base64)
//! - Playback: base64 payload → `PlaybackChunk` (i16) → `PlaybackBuffer` (float)

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::BridgeError;

/// One captured block of linear 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Scale a float input buffer into the signed 16-bit range.
    pub fn from_f32(input: &[f32], sample_rate: u32) -> Self {
        let samples = input
            .iter()
            .map(|s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        Self {
            samples,
            sample_rate,
        }
    }

    /// Little-endian byte view, the layout the remote service expects.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn encode(&self) -> EncodedFrame {
        EncodedFrame {
            data: STANDARD.encode(self.to_le_bytes()),
            mime_type: pcm_mime(self.sample_rate),
        }
    }
}

/// A capture frame ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub data: String,
    pub mime_type: String,
}

pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

fn mime_param<T: std::str::FromStr>(mime_type: &str, key: &str) -> Option<T> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case(key))
        .find_map(|(_, value)| value.trim().parse().ok())
}

/// Extract the `rate=` parameter from a MIME string such as `audio/pcm;rate=24000`.
pub fn mime_rate(mime_type: &str) -> Option<u32> {
    mime_param(mime_type, "rate")
}

/// Extract the `channels=` parameter, as in `audio/pcm;rate=24000;channels=2`.
pub fn mime_channels(mime_type: &str) -> Option<u16> {
    mime_param(mime_type, "channels")
}

/// Synthesized audio received from the remote session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    /// Interleaved samples
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PlaybackChunk {
    /// Decode a base64 payload of little-endian i16 samples.
    pub fn from_base64(
        data: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, BridgeError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| BridgeError::Decode(format!("invalid base64: {}", e)))?;
        Self::from_le_bytes(&bytes, sample_rate, channels)
    }

    pub fn from_le_bytes(
        bytes: &[u8],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, BridgeError> {
        if channels == 0 || sample_rate == 0 {
            return Err(BridgeError::Decode(format!(
                "unusable format: {} Hz, {} channels",
                sample_rate, channels
            )));
        }
        if bytes.len() % 2 != 0 {
            return Err(BridgeError::Decode(format!(
                "odd payload length {}",
                bytes.len()
            )));
        }
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        if samples.len() % channels as usize != 0 {
            return Err(BridgeError::Decode(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Convert into the float format output contexts play.
    pub fn to_buffer(&self) -> PlaybackBuffer {
        PlaybackBuffer {
            samples: self.samples.iter().map(|&s| s as f32 / 32768.0).collect(),
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}

/// Playback-ready interleaved float samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_input_scales_and_saturates() {
        let frame = AudioFrame::from_f32(&[0.0, 0.5, -0.5, 1.0, -1.0, 2.0], 16000);
        assert_eq!(frame.samples, vec![0, 16384, -16384, 32767, -32768, 32767]);
    }

    #[test]
    fn encoded_frame_is_little_endian_base64() {
        let frame = AudioFrame {
            samples: vec![1, -2],
            sample_rate: 16000,
        };
        let encoded = frame.encode();
        assert_eq!(encoded.mime_type, "audio/pcm;rate=16000");
        assert_eq!(
            STANDARD.decode(&encoded.data).unwrap(),
            vec![0x01, 0x00, 0xfe, 0xff]
        );
    }

    #[test]
    fn mime_rate_reads_rate_parameter() {
        assert_eq!(mime_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(mime_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(mime_rate("audio/pcm"), None);
        assert_eq!(mime_rate("audio/pcm;rate=abc"), None);
    }

    #[test]
    fn mime_channels_reads_channels_parameter() {
        assert_eq!(mime_channels("audio/pcm;rate=24000;channels=2"), Some(2));
        assert_eq!(mime_channels("audio/pcm;rate=24000"), None);
        assert_eq!(mime_rate("audio/pcm;channels=2;rate=24000"), Some(24000));
    }

    #[test]
    fn chunk_duration_follows_sample_rate() {
        let bytes = vec![0u8; 24000 * 2];
        let chunk = PlaybackChunk::from_le_bytes(&bytes, 24000, 1).unwrap();
        assert_eq!(chunk.frame_count(), 24000);
        assert!((chunk.duration() - 1.0).abs() < 1e-9);
        assert!((chunk.to_buffer().duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        assert!(matches!(
            PlaybackChunk::from_le_bytes(&[0, 1, 2], 24000, 1),
            Err(BridgeError::Decode(_))
        ));
        assert!(matches!(
            PlaybackChunk::from_base64("not base64!!", 24000, 1),
            Err(BridgeError::Decode(_))
        ));
        assert!(matches!(
            PlaybackChunk::from_le_bytes(&[0, 0, 0, 0, 0, 0], 24000, 2),
            Err(BridgeError::Decode(_))
        ));
    }

    #[test]
    fn decoded_samples_map_back_to_unit_range() {
        let chunk = PlaybackChunk {
            samples: vec![-32768, 0, 16384],
            channels: 1,
            sample_rate: 24000,
        };
        assert_eq!(chunk.to_buffer().samples, vec![-1.0, 0.0, 0.5]);
    }
}
