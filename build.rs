use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    network: Network,
    live: Live,
    audio: Audio,
    models: Models,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Network {
    live_url: String,
    rest_url: String,
    api_key_env: String,
}

#[derive(Deserialize)]
struct Live {
    model: String,
    voice_name: String,
}

#[derive(Deserialize)]
struct Audio {
    input_sample_rate: u32,
    output_sample_rate: u32,
    channels: u16,
    frame_size: usize,
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
    lag_warn_secs: f64,
}

#[derive(Deserialize)]
struct Models {
    chat: String,
    chat_low_latency: String,
    chat_search: String,
    chat_maps: String,
    image: String,
    image_edit: String,
    video: String,
    speech: String,
    analysis: String,
    speech_voice: String,
    thinking_budget: u32,
    video_poll_secs: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // Network
    println!("cargo:rustc-env=LIVE_URL={}", config.network.live_url);
    println!("cargo:rustc-env=REST_URL={}", config.network.rest_url);
    println!("cargo:rustc-env=API_KEY_ENV={}", config.network.api_key_env);

    // Live session
    println!("cargo:rustc-env=LIVE_MODEL={}", config.live.model);
    println!("cargo:rustc-env=LIVE_VOICE={}", config.live.voice_name);

    // Audio
    println!("cargo:rustc-env=AUDIO_INPUT_RATE={}", config.audio.input_sample_rate);
    println!("cargo:rustc-env=AUDIO_OUTPUT_RATE={}", config.audio.output_sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_FRAME_SIZE={}", config.audio.frame_size);
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD={}", config.audio.playback_period_size);
    println!("cargo:rustc-env=AUDIO_LAG_WARN_SECS={}", config.audio.lag_warn_secs);

    // Request/response models
    println!("cargo:rustc-env=MODEL_CHAT={}", config.models.chat);
    println!("cargo:rustc-env=MODEL_CHAT_LOW_LATENCY={}", config.models.chat_low_latency);
    println!("cargo:rustc-env=MODEL_CHAT_SEARCH={}", config.models.chat_search);
    println!("cargo:rustc-env=MODEL_CHAT_MAPS={}", config.models.chat_maps);
    println!("cargo:rustc-env=MODEL_IMAGE={}", config.models.image);
    println!("cargo:rustc-env=MODEL_IMAGE_EDIT={}", config.models.image_edit);
    println!("cargo:rustc-env=MODEL_VIDEO={}", config.models.video);
    println!("cargo:rustc-env=MODEL_SPEECH={}", config.models.speech);
    println!("cargo:rustc-env=MODEL_ANALYSIS={}", config.models.analysis);
    println!("cargo:rustc-env=SPEECH_VOICE={}", config.models.speech_voice);
    println!("cargo:rustc-env=THINKING_BUDGET={}", config.models.thinking_budget);
    println!("cargo:rustc-env=VIDEO_POLL_SECS={}", config.models.video_poll_secs);
}
