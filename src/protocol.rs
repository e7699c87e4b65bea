//! JSON messages exchanged with the live generation endpoint.

use serde::{Deserialize, Serialize};

use crate::audio::EncodedFrame;

pub const SYSTEM_INSTRUCTION: &str = "You are a world-class AI Infrastructure Architect expert on Azure, Kubernetes, and Docker. \
You are helping a user explore a specific project architecture: \"AI Infrastructure Architecture: Azure Machine Learning with Docker, Kubernetes & Grafana Monitoring\".\n\n\
Key Architecture details:\n\
- Model Serving: Azure Kubernetes Service (AKS) with Docker.\n\
- Model Management: Azure Machine Learning (AML) with MLflow and Pipelines.\n\
- Storage: Data Lake, Blob Storage, Cosmos DB.\n\
- Monitoring: Grafana, Prometheus, Azure Monitor.\n\
- CI/CD: Azure DevOps Pipelines.\n\
- Security: Key Vault, Private Clusters, Managed Identity.\n\n\
Focus on technical accuracy and best practices.";

// ======================== Shared content types ========================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

impl SpeechConfig {
    pub fn voice(name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoice {
                    voice_name: name.into(),
                },
            },
        }
    }
}

// ======================== Client → server ========================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: LiveGenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveGenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl ClientMessage {
    pub fn setup(model: &str, voice: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        ClientMessage::Setup(Setup {
            model,
            generation_config: LiveGenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig::voice(voice),
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(SYSTEM_INSTRUCTION)],
            },
        })
    }

    pub fn audio(frame: EncodedFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: frame.mime_type,
                data: frame.data,
            }],
        })
    }
}

// ======================== Server → client ========================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<WireServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

/// Audio payload carried by one server message, still base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineAudio {
    pub mime_type: String,
    pub data: String,
}

/// What the bridge cares about in a `serverContent` message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub audio: Option<InlineAudio>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl From<WireServerContent> for ServerContent {
    fn from(wire: WireServerContent) -> Self {
        let audio = wire
            .model_turn
            .into_iter()
            .flat_map(|turn| turn.parts)
            .filter_map(|part| part.inline_data)
            .find(|blob| blob.mime_type.starts_with("audio/"))
            .map(|blob| InlineAudio {
                mime_type: blob.mime_type,
                data: blob.data,
            });
        ServerContent {
            audio,
            interrupted: wire.interrupted,
            turn_complete: wire.turn_complete,
        }
    }
}
