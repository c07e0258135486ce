//! Conversation items as reported by the realtime service.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for ItemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRole::User => write!(f, "user"),
            ItemRole::Assistant => write!(f, "assistant"),
            ItemRole::System => write!(f, "system"),
        }
    }
}

/// Progress of an item. Once `Completed` an item is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    // Items restored from storage were settled when they were written.
    #[default]
    Completed,
    Cancelled,
}

/// How a user item was entered. Recorded once and never altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMethod {
    Voice,
    Text,
}

/// One message or turn, mutated in place as streaming updates arrive.
///
/// `transcript` is the finalized text (speech recognition result or the
/// completed response text); `text` accumulates streaming deltas until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationItem {
    pub id: String,
    pub role: ItemRole,
    pub status: ItemStatus,
    pub transcript: Option<String>,
    pub text: Option<String>,
    pub audio_present: bool,
}

impl ConversationItem {
    pub fn new(id: impl Into<String>, role: ItemRole) -> Self {
        Self {
            id: id.into(),
            role,
            status: ItemStatus::InProgress,
            transcript: None,
            text: None,
            audio_present: false,
        }
    }

    /// A settled user text message.
    pub fn user_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Completed,
            text: Some(text.into()),
            ..Self::new(id, ItemRole::User)
        }
    }

    /// A user voice message whose transcript has not arrived yet.
    pub fn user_voice(id: impl Into<String>) -> Self {
        Self {
            audio_present: true,
            ..Self::new(id, ItemRole::User)
        }
    }

    /// Best available text without placeholders: the finalized transcript,
    /// then the accumulated text. Empty strings count as absent.
    pub fn best_text(&self) -> Option<&str> {
        self.transcript
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.text.as_deref().filter(|t| !t.is_empty()))
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}
