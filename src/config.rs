#[derive(Debug, Clone)]
pub struct Config {
    // 网络配置
    pub live_url: &'static str,
    pub rest_url: &'static str,
    pub api_key_env: &'static str,

    // Live session
    pub live_model: &'static str,
    pub live_voice: &'static str,

    // 音频配置
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub playback_period_size: usize,
    pub lag_warn_secs: f64,

    // Request/response models
    pub model_chat: &'static str,
    pub model_chat_low_latency: &'static str,
    pub model_chat_search: &'static str,
    pub model_chat_maps: &'static str,
    pub model_image: &'static str,
    pub model_image_edit: &'static str,
    pub model_video: &'static str,
    pub model_speech: &'static str,
    pub model_analysis: &'static str,
    pub speech_voice: &'static str,
    pub thinking_budget: u32,
    pub video_poll_secs: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            live_url: env!("LIVE_URL"),
            rest_url: env!("REST_URL"),
            api_key_env: env!("API_KEY_ENV"),

            live_model: env!("LIVE_MODEL"),
            live_voice: env!("LIVE_VOICE"),

            input_sample_rate: env!("AUDIO_INPUT_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_INPUT_RATE")?,
            output_sample_rate: env!("AUDIO_OUTPUT_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_OUTPUT_RATE")?,
            channels: env!("AUDIO_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            frame_size: env!("AUDIO_FRAME_SIZE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_FRAME_SIZE")?,
            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD")?,
            lag_warn_secs: env!("AUDIO_LAG_WARN_SECS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_LAG_WARN_SECS")?,

            model_chat: env!("MODEL_CHAT"),
            model_chat_low_latency: env!("MODEL_CHAT_LOW_LATENCY"),
            model_chat_search: env!("MODEL_CHAT_SEARCH"),
            model_chat_maps: env!("MODEL_CHAT_MAPS"),
            model_image: env!("MODEL_IMAGE"),
            model_image_edit: env!("MODEL_IMAGE_EDIT"),
            model_video: env!("MODEL_VIDEO"),
            model_speech: env!("MODEL_SPEECH"),
            model_analysis: env!("MODEL_ANALYSIS"),
            speech_voice: env!("SPEECH_VOICE"),
            thinking_budget: env!("THINKING_BUDGET")
                .parse()
                .map_err(|_| "Failed to parse THINKING_BUDGET")?,
            video_poll_secs: env!("VIDEO_POLL_SECS")
                .parse()
                .map_err(|_| "Failed to parse VIDEO_POLL_SECS")?,
        })
    }

    /// Reads the API key from the environment variable named in `config.toml`.
    /// The key is never compiled into the binary.
    pub fn api_key(&self) -> anyhow::Result<String> {
        match std::env::var(self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => anyhow::bail!("environment variable {} is not set", self.api_key_env),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
