//! Request/response client for the non-streaming generation endpoints:
//! chat with optional grounding, image generation and editing, speech
//! synthesis, video generation and media analysis.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::audio::PlaybackChunk;
use crate::audio::frame::mime_rate;
use crate::config::Config;
use crate::protocol::{Blob, Content, Part, SYSTEM_INSTRUCTION, SpeechConfig};

const NO_RESPONSE: &str = "No response generated.";
const ANALYSIS_FAILED: &str = "Analysis failed.";
const CHAT_TEMPERATURE: f64 = 0.7;

// ======================== Option types ========================

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "unsupported {} '{}', expected one of: {}",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(AspectRatio {
    Square => "1:1",
    Portrait2x3 => "2:3",
    Landscape3x2 => "3:2",
    Portrait3x4 => "3:4",
    Landscape4x3 => "4:3",
    Portrait9x16 => "9:16",
    Landscape16x9 => "16:9",
    Ultrawide21x9 => "21:9",
});

string_enum!(ImageSize {
    OneK => "1K",
    TwoK => "2K",
    FourK => "4K",
});

string_enum!(VideoAspect {
    Landscape => "16:9",
    Portrait => "9:16",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatOptions {
    pub thinking: bool,
    pub search: bool,
    pub maps: bool,
    pub low_latency: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundingLink {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub grounding: Vec<GroundingLink>,
}

// ======================== Wire types ========================

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    GoogleSearch {},
    GoogleMaps {},
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub aspect_ratio: String,
    pub image_size: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<GroundingSource>,
    pub maps: Option<GroundingSource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroundingSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// Concatenated text of the first candidate.
    pub fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() { None } else { Some(text) }
    }

    pub fn first_inline(&self) -> Option<&Blob> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }

    pub fn grounding(&self) -> Vec<GroundingLink> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|meta| {
                meta.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref().or(chunk.maps.as_ref()))
                    .filter_map(|src| {
                        let uri = src.uri.clone()?;
                        let title = src.title.clone().unwrap_or_else(|| uri.clone());
                        Some(GroundingLink { uri, title })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub instances: Vec<VideoInstance>,
    pub parameters: VideoParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInstance {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<VideoImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoImage {
    pub bytes_base64_encoded: String,
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoParameters {
    pub sample_count: u32,
    pub resolution: String,
    pub aspect_ratio: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<OperationError>,
    pub response: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl Operation {
    /// Download URI of the first generated video, if the operation has one.
    pub fn video_uri(&self) -> Option<&str> {
        self.response
            .as_ref()?
            .pointer("/generateVideoResponse/generatedSamples/0/video/uri")?
            .as_str()
    }
}

// ======================== Request builders ========================

/// Pick the chat model and tools for `options`. Maps wins over search,
/// and either wins over low latency.
pub fn chat_model(config: &Config, options: ChatOptions) -> (&'static str, Vec<Tool>) {
    let mut model = if options.low_latency {
        config.model_chat_low_latency
    } else {
        config.model_chat
    };
    let mut tools = Vec::new();
    if options.search {
        model = config.model_chat_search;
        tools.push(Tool::GoogleSearch {});
    }
    if options.maps {
        model = config.model_chat_maps;
        tools.push(Tool::GoogleMaps {});
    }
    (model, tools)
}

pub fn chat_request(
    config: &Config,
    message: &str,
    options: ChatOptions,
) -> (&'static str, GenerateRequest) {
    let (model, tools) = chat_model(config, options);
    // only the pro model accepts a thinking budget this large
    let thinking_config = (options.thinking && model == config.model_chat).then(|| ThinkingConfig {
        thinking_budget: config.thinking_budget,
    });
    let request = GenerateRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(message)],
        }],
        system_instruction: Some(Content {
            role: None,
            parts: vec![Part::text(SYSTEM_INSTRUCTION)],
        }),
        tools,
        generation_config: Some(GenerationConfig {
            temperature: Some(CHAT_TEMPERATURE),
            thinking_config,
            ..Default::default()
        }),
    };
    (model, request)
}

pub fn image_request(prompt: &str, aspect: AspectRatio, size: ImageSize) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: None,
            parts: vec![Part::text(prompt)],
        }],
        generation_config: Some(GenerationConfig {
            image_config: Some(ImageConfig {
                aspect_ratio: aspect.as_str().to_string(),
                image_size: size.as_str().to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Inline media first, then the instruction.
pub fn media_request(data: &[u8], mime_type: &str, prompt: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: None,
            parts: vec![Part::inline(mime_type, STANDARD.encode(data)), Part::text(prompt)],
        }],
        ..Default::default()
    }
}

pub fn speech_request(text: &str, voice: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: None,
            parts: vec![Part::text(text)],
        }],
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig::voice(voice)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn video_request(prompt: &str, image: Option<&[u8]>, aspect: VideoAspect) -> VideoRequest {
    VideoRequest {
        instances: vec![VideoInstance {
            prompt: prompt.to_string(),
            image: image.map(|png| VideoImage {
                bytes_base64_encoded: STANDARD.encode(png),
                mime_type: "image/png".to_string(),
            }),
        }],
        parameters: VideoParameters {
            sample_count: 1,
            resolution: "720p".to_string(),
            aspect_ratio: aspect.as_str().to_string(),
        },
    }
}

// ======================== Client ========================

pub struct GenAiClient {
    http: Client,
    api_key: String,
    config: Config,
}

impl GenAiClient {
    pub fn new(config: &Config, api_key: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            config: config.clone(),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.rest_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, url: &str, body: &B) -> Result<R> {
        log::debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::decode(resp).await
    }

    async fn get<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let resp = self
            .http
            .get(url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::decode(resp).await
    }

    async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("HTTP Error: {} {}", status, body);
        }
        resp.json::<R>().await.context("JSON parse error")
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        self.post(&self.model_url(model, "generateContent"), request).await
    }

    pub async fn send_message(&self, message: &str, options: ChatOptions) -> Result<ChatReply> {
        let (model, request) = chat_request(&self.config, message, options);
        log::info!("Chat via {} ({:?})", model, options);
        let response = self.generate(model, &request).await.map_err(|e| {
            log::error!("Chat error: {:#}", e);
            e
        })?;
        Ok(ChatReply {
            text: response.text().unwrap_or_else(|| NO_RESPONSE.to_string()),
            grounding: response.grounding(),
        })
    }

    /// Returns the decoded PNG bytes.
    pub async fn generate_image(
        &self,
        prompt: &str,
        aspect: AspectRatio,
        size: ImageSize,
    ) -> Result<Vec<u8>> {
        let request = image_request(prompt, aspect, size);
        let response = self.generate(self.config.model_image, &request).await?;
        let blob = response
            .first_inline()
            .context("No image generated.")?;
        STANDARD
            .decode(&blob.data)
            .context("Image payload is not valid base64")
    }

    pub async fn edit_image(&self, png: &[u8], prompt: &str) -> Result<Option<Vec<u8>>> {
        let request = media_request(png, "image/png", prompt);
        let response = self.generate(self.config.model_image_edit, &request).await?;
        response
            .first_inline()
            .map(|blob| STANDARD.decode(&blob.data).context("Image payload is not valid base64"))
            .transpose()
    }

    /// Synthesize `text`; `None` when the model returned no audio.
    pub async fn generate_speech(&self, text: &str, voice: &str) -> Result<Option<PlaybackChunk>> {
        let request = speech_request(text, voice);
        let response = self.generate(self.config.model_speech, &request).await?;
        let Some(blob) = response.first_inline() else {
            return Ok(None);
        };
        let rate = mime_rate(&blob.mime_type).unwrap_or(self.config.output_sample_rate);
        let chunk = PlaybackChunk::from_base64(&blob.data, rate, 1)?;
        Ok(Some(chunk))
    }

    /// Start a video generation, wait for it to finish and download the result.
    pub async fn generate_video(
        &self,
        prompt: &str,
        image: Option<&[u8]>,
        aspect: VideoAspect,
    ) -> Result<Vec<u8>> {
        let request = video_request(prompt, image, aspect);
        let url = self.model_url(self.config.model_video, "predictLongRunning");
        let mut operation: Operation = self.post(&url, &request).await?;
        log::info!("Video operation started: {}", operation.name);

        let poll = Duration::from_secs(self.config.video_poll_secs);
        let op_url = format!(
            "{}/{}",
            self.config.rest_url.trim_end_matches('/'),
            operation.name
        );
        while !operation.done {
            tokio::time::sleep(poll).await;
            operation = self.get(&op_url).await?;
            log::debug!("Video operation {} done={}", op_url, operation.done);
        }

        if let Some(err) = &operation.error {
            anyhow::bail!("Video generation failed ({}): {}", err.code, err.message);
        }
        let uri = operation
            .video_uri()
            .context("Video operation finished without a video")?;

        let resp = self
            .http
            .get(uri)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("Video download failed")?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Never fails: errors are logged and reported as a fixed message.
    pub async fn analyze_media(&self, data: &[u8], mime_type: &str, prompt: &str) -> String {
        let request = media_request(data, mime_type, prompt);
        match self.generate(self.config.model_analysis, &request).await {
            Ok(response) => response.text().unwrap_or_default(),
            Err(e) => {
                log::error!("Media analysis error: {:#}", e);
                ANALYSIS_FAILED.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn default_chat_uses_pro_model_with_thinking() {
        let config = config();
        let options = ChatOptions {
            thinking: true,
            ..Default::default()
        };
        let (model, request) = chat_request(&config, "hello", options);
        assert_eq!(model, config.model_chat);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["generationConfig"]["temperature"], json!(0.7));
        assert_eq!(
            value["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            json!(config.thinking_budget)
        );
        assert!(value.get("tools").is_none());
        assert!(
            value["systemInstruction"]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("You are a world-class")
        );
    }

    #[test]
    fn thinking_is_dropped_off_the_pro_model() {
        let config = config();
        let options = ChatOptions {
            thinking: true,
            low_latency: true,
            ..Default::default()
        };
        let (model, request) = chat_request(&config, "hi", options);
        assert_eq!(model, config.model_chat_low_latency);
        assert!(
            request
                .generation_config
                .as_ref()
                .unwrap()
                .thinking_config
                .is_none()
        );
    }

    #[test]
    fn grounding_tools_pick_their_models() {
        let config = config();
        let search = ChatOptions {
            search: true,
            low_latency: true,
            ..Default::default()
        };
        assert_eq!(
            chat_model(&config, search),
            (config.model_chat_search, vec![Tool::GoogleSearch {}])
        );

        let both = ChatOptions {
            search: true,
            maps: true,
            ..Default::default()
        };
        let (model, tools) = chat_model(&config, both);
        assert_eq!(model, config.model_chat_maps);
        assert_eq!(
            serde_json::to_value(&tools).unwrap(),
            json!([{"googleSearch": {}}, {"googleMaps": {}}])
        );
    }

    #[test]
    fn reply_text_and_grounding_are_extracted() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "AKS "}, {"text": "scales."}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://learn.microsoft.com/aks", "title": "AKS docs"}},
                    {"maps": {"uri": "https://maps.google.com/?cid=1"}},
                    {"web": {"title": "no uri"}}
                ]}
            }]
        });
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.text().as_deref(), Some("AKS scales."));
        assert_eq!(
            response.grounding(),
            vec![
                GroundingLink {
                    uri: "https://learn.microsoft.com/aks".into(),
                    title: "AKS docs".into(),
                },
                GroundingLink {
                    uri: "https://maps.google.com/?cid=1".into(),
                    title: "https://maps.google.com/?cid=1".into(),
                },
            ]
        );

        let empty: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.text(), None);
        assert!(empty.grounding().is_empty());
    }

    #[test]
    fn image_and_speech_requests() {
        let value = serde_json::to_value(image_request(
            "a cluster diagram",
            AspectRatio::Landscape16x9,
            ImageSize::TwoK,
        ))
        .unwrap();
        assert_eq!(
            value["generationConfig"]["imageConfig"],
            json!({"aspectRatio": "16:9", "imageSize": "2K"})
        );

        let value = serde_json::to_value(speech_request("hello", "Kore")).unwrap();
        assert_eq!(value["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
    }

    #[test]
    fn media_parts_put_data_before_prompt() {
        let value = serde_json::to_value(media_request(&[1, 2, 3], "image/png", "describe")).unwrap();
        assert_eq!(
            value["contents"][0]["parts"],
            json!([
                {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                {"text": "describe"}
            ])
        );
    }

    #[test]
    fn video_request_and_operation() {
        let value =
            serde_json::to_value(video_request("rollout", Some(&[0xff]), VideoAspect::Portrait))
                .unwrap();
        assert_eq!(value["instances"][0]["image"]["bytesBase64Encoded"], "/w==");
        assert_eq!(value["parameters"]["aspectRatio"], "9:16");
        assert_eq!(value["parameters"]["resolution"], "720p");

        let op: Operation = serde_json::from_value(json!({
            "name": "models/veo/operations/42",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://files.example/video.mp4"}}
            ]}}
        }))
        .unwrap();
        assert!(op.done);
        assert_eq!(op.video_uri(), Some("https://files.example/video.mp4"));
    }

    #[test]
    fn option_enums_parse_their_labels() {
        assert_eq!("21:9".parse::<AspectRatio>(), Ok(AspectRatio::Ultrawide21x9));
        assert_eq!("4K".parse::<ImageSize>(), Ok(ImageSize::FourK));
        assert_eq!("9:16".parse::<VideoAspect>(), Ok(VideoAspect::Portrait));
        assert!("5:4".parse::<AspectRatio>().is_err());
        assert_eq!(VideoAspect::Landscape.to_string(), "16:9");
    }
}
