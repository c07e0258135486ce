//! Serde types for the OpenAI Realtime (beta v1) event protocol. Only the
//! fields this client reads or writes are modelled; unknown server events
//! deserialize to [`ServerEvent::Unknown`].

use parley_core::{generic_types::Voice, item::ItemRole};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ItemCreate },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: Voice,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// Omitted when transcription is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Transcription>,
    /// `null` selects manual turn-taking.
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Transcription {
    pub model: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl TurnDetection {
    pub fn server_vad() -> Self {
        Self {
            kind: "server_vad".to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ItemCreate {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: ItemRole,
    pub content: Vec<InputContent>,
}

impl ItemCreate {
    pub fn user_text(text: &str) -> Self {
        Self {
            kind: "message".to_string(),
            role: ItemRole::User,
            content: vec![InputContent {
                kind: "input_text".to_string(),
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InputContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ServerItem },
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted { item_id: String },
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated { item_id: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { item_id: String, transcript: String },
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed { item_id: String },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded { item: ServerItem },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone { item: ServerItem },
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { item_id: String, delta: String },
    #[serde(rename = "response.text.done")]
    ResponseTextDone { item_id: String, text: String },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { item_id: String, delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { item_id: String, transcript: String },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { item_id: String, delta: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<ItemRole>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content: Vec<ServerContent>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}
