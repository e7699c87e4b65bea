use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;

use live_audio_bridge::audio::{self, PlaybackScheduler};
use live_audio_bridge::genai::{AspectRatio, ChatOptions, GenAiClient, ImageSize, VideoAspect};
use live_audio_bridge::net_link::LiveLink;
use live_audio_bridge::{AudioBridge, BridgeCommand, BridgeConfig, BridgeEvent, Config, SessionState};

#[derive(Parser)]
#[command(version, about = "Voice and media client for the Gemini generation service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the live model until Ctrl+C
    Live {
        /// Replay this 16 kHz WAV file instead of the microphone
        #[arg(long)]
        input_wav: Option<PathBuf>,
        /// Record the model's voice to this WAV file instead of the speaker
        #[arg(long)]
        output_wav: Option<PathBuf>,
    },
    /// One chat turn
    Chat {
        message: String,
        #[arg(long)]
        thinking: bool,
        #[arg(long)]
        search: bool,
        #[arg(long)]
        maps: bool,
        #[arg(long)]
        low_latency: bool,
    },
    /// Synthesize speech and play it
    Speak {
        text: String,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        output_wav: Option<PathBuf>,
    },
    /// Generate an image, or edit one with --edit
    Image {
        prompt: String,
        #[arg(long, default_value = "1:1")]
        aspect: AspectRatio,
        #[arg(long, default_value = "1K")]
        size: ImageSize,
        #[arg(long)]
        edit: Option<PathBuf>,
        #[arg(short, long, default_value = "image.png")]
        output: PathBuf,
    },
    /// Generate a short video, optionally from a starting image
    Video {
        prompt: String,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value = "16:9")]
        aspect: VideoAspect,
        #[arg(short, long, default_value = "video.mp4")]
        output: PathBuf,
    },
    /// Ask a question about an image, video or audio file
    Analyze {
        file: PathBuf,
        prompt: String,
        #[arg(long)]
        mime: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::new().unwrap_or_default();
    log::info!("{} {} starting", env!("APP_NAME"), env!("APP_VERSION"));

    match cli.command {
        Command::Live {
            input_wav,
            output_wav,
        } => run_live(&config, input_wav.as_deref(), output_wav.as_deref()).await,
        Command::Chat {
            message,
            thinking,
            search,
            maps,
            low_latency,
        } => {
            let client = GenAiClient::new(&config, config.api_key()?);
            let options = ChatOptions {
                thinking,
                search,
                maps,
                low_latency,
            };
            let reply = client.send_message(&message, options).await?;
            println!("{}", reply.text);
            if !reply.grounding.is_empty() {
                println!("\nSources:");
                for link in reply.grounding {
                    println!("  {} <{}>", link.title, link.uri);
                }
            }
            Ok(())
        }
        Command::Speak {
            text,
            voice,
            output_wav,
        } => {
            let voice = voice.as_deref().unwrap_or(config.speech_voice);
            speak(&config, &text, voice, output_wav.as_deref()).await
        }
        Command::Image {
            prompt,
            aspect,
            size,
            edit,
            output,
        } => {
            let client = GenAiClient::new(&config, config.api_key()?);
            let png = match edit {
                Some(source) => {
                    let original = read_file(&source)?;
                    match client.edit_image(&original, &prompt).await? {
                        Some(png) => png,
                        None => {
                            println!("The model returned no edited image.");
                            return Ok(());
                        }
                    }
                }
                None => client.generate_image(&prompt, aspect, size).await?,
            };
            write_file(&output, &png)
        }
        Command::Video {
            prompt,
            image,
            aspect,
            output,
        } => {
            let client = GenAiClient::new(&config, config.api_key()?);
            let image = image.as_deref().map(read_file).transpose()?;
            println!("Generating video, this takes a few minutes...");
            let video = client
                .generate_video(&prompt, image.as_deref(), aspect)
                .await?;
            write_file(&output, &video)
        }
        Command::Analyze { file, prompt, mime } => {
            let client = GenAiClient::new(&config, config.api_key()?);
            let data = read_file(&file)?;
            let mime = mime.unwrap_or_else(|| guess_mime(&file).to_string());
            println!("{}", client.analyze_media(&data, &mime, &prompt).await);
            Ok(())
        }
    }
}

async fn run_live(config: &Config, input: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let connector = Arc::new(LiveLink::new(config, config.api_key()?));
    let capture = audio::capture_device(config, input)?;
    let playback = audio::playback_device(config, output)?;

    // 通知通道和命令通道
    let (tx_notify, mut rx_notify) = mpsc::unbounded_channel();
    let (tx_cmd, rx_cmd) = mpsc::channel(8);

    let bridge = AudioBridge::new(
        BridgeConfig::from(config),
        connector,
        capture,
        playback,
        tx_notify,
    );
    let task = tokio::spawn(bridge.run(rx_cmd));
    tx_cmd.send(BridgeCommand::Start).await?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_notify.recv() => match event {
                BridgeEvent::State(SessionState::Open) => println!("Session open, start talking."),
                BridgeEvent::State(SessionState::Idle) => {
                    println!("Session ended.");
                    break;
                }
                BridgeEvent::State(SessionState::Error) => break,
                BridgeEvent::State(state) => log::info!("Bridge state: {:?}", state),
                BridgeEvent::Error(e) => eprintln!("Bridge error: {}", e),
                BridgeEvent::Interrupted { stopped } => {
                    log::info!("Barge-in, dropped {} queued chunks", stopped)
                }
                BridgeEvent::TurnComplete => log::debug!("Turn complete"),
            }
        }
    }

    // closing the command channel stops the bridge and releases the devices
    drop(tx_cmd);
    task.await?;
    Ok(())
}

async fn speak(config: &Config, text: &str, voice: &str, output: Option<&Path>) -> Result<()> {
    let client = GenAiClient::new(config, config.api_key()?);
    let Some(chunk) = client.generate_speech(text, voice).await? else {
        println!("No audio generated.");
        return Ok(());
    };
    log::info!("Received {:.2}s of speech", chunk.duration());

    let mut playback = audio::playback_device(config, output)?;
    let mut out = playback.open_output(chunk.sample_rate, chunk.channels)?;
    let mut scheduler = PlaybackScheduler::new(config.lag_warn_secs);
    let placement = scheduler.schedule(out.as_mut(), chunk.to_buffer());

    let remaining = (placement.end() - out.current_time()).max(0.0);
    tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
    out.close();
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Saved {} bytes to {}", data.len(), path.display());
    Ok(())
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
