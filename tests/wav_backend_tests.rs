// Integration tests for the WAV-file capture and playback backends
//
// These write real WAV files into a temp dir and push them through the same
// capability traits the bridge uses.

use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use live_audio_bridge::audio::{
    AudioCapture, AudioPlayback, PlaybackBuffer, WavCapture, WavPlayback,
};
use live_audio_bridge::error::BridgeError;

fn write_tone(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn constant(frames: usize, value: f32) -> PlaybackBuffer {
    PlaybackBuffer {
        samples: vec![value; frames],
        channels: 1,
        sample_rate: 24000,
    }
}

#[tokio::test]
async fn test_wav_capture_delivers_padded_frames_in_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("mic.wav");
    let samples: Vec<i16> = (0..10_000).map(|i| (i % 1000) as i16 * 16).collect();
    write_tone(&path, 16000, &samples)?;

    let mut capture = WavCapture::new(&path).unpaced();
    let mut input = capture.open_input(16000, 4096)?;
    input.start()?;

    let mut buffers = Vec::new();
    while let Some(buffer) = input.next_buffer().await {
        buffers.push(buffer);
    }

    assert_eq!(buffers.len(), 3, "10000 samples should arrive as 3 frames of 4096");
    assert!(buffers.iter().all(|b| b.len() == 4096));
    assert_eq!(buffers[0][1], 16.0 / 32768.0);
    assert_eq!(buffers[1][0], samples[4096] as f32 / 32768.0);
    // tail frame is zero padded
    assert_eq!(buffers[2][10_000 - 8192], 0.0);
    input.release();
    Ok(())
}

#[test]
fn test_wav_capture_rejects_wrong_rate() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("mic44.wav");
    write_tone(&path, 44100, &[0; 100])?;

    let result = WavCapture::new(&path).open_input(16000, 4096);
    assert!(matches!(result, Err(BridgeError::DeviceAccess(_))));
    Ok(())
}

#[test]
fn test_wav_capture_missing_file() {
    let result = WavCapture::new("/nonexistent/mic.wav").open_input(16000, 4096);
    assert!(matches!(result, Err(BridgeError::DeviceAccess(_))));
}

#[test]
fn test_wav_playback_renders_schedule() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("speaker.wav");

    let mut playback = WavPlayback::new(&path);
    let mut output = playback.open_output(24000, 1)?;
    assert_eq!(output.sample_rate(), 24000);
    assert_eq!(output.channels(), 1);

    let first = output.schedule(constant(2400, 0.25), 0.0);
    let second = output.schedule(constant(2400, -0.25), 0.1);
    assert!((first.end_time() - 0.1).abs() < 1e-9);
    assert!((second.end_time() - 0.2).abs() < 1e-9);
    output.close();

    let mut reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, 24000);
    let rendered: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
    assert_eq!(rendered.len(), 4800);
    assert_eq!(rendered[0], (0.25 * 32767.0) as i16);
    assert_eq!(rendered[2399], (0.25 * 32767.0) as i16);
    assert_eq!(rendered[2400], (-0.25 * 32767.0) as i16);
    Ok(())
}

#[test]
fn test_wav_playback_stop_truncates_source() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("cut.wav");

    let mut output = WavPlayback::new(&path).open_output(24000, 1)?;
    // far enough ahead that the wall clock cannot reach it before the stop
    let mut late = output.schedule(constant(24000, 0.5), 60.0);
    late.stop();
    output.close();

    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.len(), 0);
    Ok(())
}

#[test]
fn test_wav_playback_rejects_empty_format() {
    let result = WavPlayback::new("/tmp/unused.wav").open_output(0, 1);
    assert!(matches!(result, Err(BridgeError::DeviceAccess(_))));
}
