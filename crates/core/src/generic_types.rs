use crate::item::ConversationItem;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Sample rate of PCM16 audio exchanged with the realtime service.
pub const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// Voices offered by the realtime service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl Voice {
    pub const ALL: [Voice; 8] = [
        Voice::Alloy,
        Voice::Echo,
        Voice::Shimmer,
        Voice::Ash,
        Voice::Ballad,
        Voice::Coral,
        Voice::Sage,
        Voice::Verse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Ash => "ash",
            Voice::Ballad => "ballad",
            Voice::Coral => "coral",
            Voice::Echo => "echo",
            Voice::Sage => "sage",
            Voice::Shimmer => "shimmer",
            Voice::Verse => "verse",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown voice '{0}'")]
pub struct UnknownVoice(pub String);

impl FromStr for Voice {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Voice::ALL
            .into_iter()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownVoice(name.to_string()))
    }
}

/// Turn-detection mode: push-to-talk or server-side voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    Manual,
    #[default]
    Automatic,
}

impl TurnMode {
    pub fn toggled(self) -> Self {
        match self {
            TurnMode::Manual => TurnMode::Automatic,
            TurnMode::Automatic => TurnMode::Manual,
        }
    }
}

/// Configuration applied to the realtime service once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub instructions: String,
    pub voice: Voice,
    /// `None` disables input transcription.
    pub transcription_model: Option<String>,
    pub turn_detection: TurnMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            voice: Voice::default(),
            transcription_model: Some("whisper-1".to_string()),
            turn_detection: TurnMode::default(),
        }
    }
}

/// Where playback stopped when it was interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffset {
    /// Playback track id, which is the id of the assistant item being spoken.
    pub track_id: String,
    /// Samples of that track already played at [`REALTIME_SAMPLE_RATE`].
    pub sample_offset: u64,
}

/// Events a realtime client emits back to the session manager, in the order
/// the remote side produced them.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// The conversation changed; carries the full current item snapshot.
    ItemsChanged(Vec<ConversationItem>),
    /// A chunk of synthesized speech for the item `item_id`.
    AudioDelta { item_id: String, pcm: Vec<i16> },
    /// The assistant's turn was cut off by new user speech.
    ConversationInterrupted,
    /// An error reported by the remote side. Non-fatal.
    Error(String),
    /// The connection was closed.
    Closed,
}
