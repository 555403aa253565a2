//! Wire types for the Gemini Live `BidiGenerateContent` websocket protocol.

use live_voice_core::codec::WireChunk;
use live_voice_core::generic_types::{self, InboundMessage, SessionRequest};
use serde::{Deserialize, Serialize};

/// Mime type assumed for inline audio the server sends without one.
pub const DEFAULT_OUTPUT_MIME_TYPE: &str = "audio/pcm;rate=24000";

// --- Client -> server ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
}

impl ClientMessage {
    pub fn setup(request: &SessionRequest) -> Self {
        let response_modality = match request.response_modality {
            generic_types::ResponseModality::Text => ResponseModality::Text,
            generic_types::ResponseModality::Audio => ResponseModality::Audio,
        };
        ClientMessage::Setup(BidiGenerateContentSetup {
            model: request.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![response_modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: request.voice.name().to_string(),
                        },
                    },
                },
            },
            system_instruction: request.system_instruction.as_ref().map(|text| Content {
                parts: vec![Part { text: text.clone() }],
            }),
        })
    }

    pub fn audio(chunk: WireChunk) -> Self {
        ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
            audio: Blob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            },
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentRealtimeInput {
    pub audio: Blob,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// --- Server -> client ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<LiveServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug)]
pub struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerBlob {
    pub mime_type: Option<String>,
    pub data: String,
}

/// Advance notice that the server will end the connection.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl LiveServerContent {
    /// Collects every inline audio part, in order, along with the turn flags.
    pub fn into_inbound(self) -> InboundMessage {
        let audio = self
            .model_turn
            .map(|turn| turn.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.inline_data)
            .map(|blob| WireChunk {
                mime_type: blob
                    .mime_type
                    .unwrap_or_else(|| DEFAULT_OUTPUT_MIME_TYPE.to_string()),
                data: blob.data,
            })
            .collect();
        InboundMessage {
            audio,
            interrupted: self.interrupted,
            turn_complete: self.turn_complete,
        }
    }
}
