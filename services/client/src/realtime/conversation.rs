//! Folds realtime server events into the conversation item list.

use super::wire::{ServerEvent, ServerItem};
use crate::audio_utils;
use parley_core::{
    generic_types::RealtimeEvent,
    item::{ConversationItem, ItemRole, ItemStatus},
};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Conversation {
    items: Vec<ConversationItem>,
    transcription_enabled: bool,
}

fn map_status(status: Option<&str>) -> Option<ItemStatus> {
    match status? {
        "completed" => Some(ItemStatus::Completed),
        "incomplete" | "cancelled" => Some(ItemStatus::Cancelled),
        "in_progress" => Some(ItemStatus::InProgress),
        _ => None,
    }
}

impl Conversation {
    pub fn new(transcription_enabled: bool) -> Self {
        Self {
            items: Vec::new(),
            transcription_enabled,
        }
    }

    pub fn set_transcription_enabled(&mut self, enabled: bool) {
        self.transcription_enabled = enabled;
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut ConversationItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    fn snapshot(&self) -> RealtimeEvent {
        RealtimeEvent::ItemsChanged(self.items.clone())
    }

    /// Applies one server event, returning what the session manager should
    /// hear about it.
    pub fn apply(&mut self, event: ServerEvent) -> Vec<RealtimeEvent> {
        match event {
            ServerEvent::ConversationItemCreated { item }
            | ServerEvent::ResponseOutputItemAdded { item } => {
                if self.insert(&item) {
                    vec![self.snapshot()]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::ResponseOutputItemDone { item } => self.finalize(&item),
            ServerEvent::InputAudioTranscriptionCompleted {
                item_id,
                transcript,
            } => self.update(&item_id, |item| {
                item.transcript = Some(transcript.trim().to_string());
                item.status = ItemStatus::Completed;
            }),
            ServerEvent::InputAudioTranscriptionFailed { item_id } => {
                warn!(item_id = %item_id, "Input audio transcription failed");
                self.update(&item_id, |item| item.status = ItemStatus::Completed)
            }
            ServerEvent::ResponseTextDelta { item_id, delta }
            | ServerEvent::ResponseAudioTranscriptDelta { item_id, delta } => {
                self.update(&item_id, |item| {
                    item.text.get_or_insert_with(String::new).push_str(&delta);
                })
            }
            ServerEvent::ResponseTextDone { item_id, text: done }
            | ServerEvent::ResponseAudioTranscriptDone {
                item_id,
                transcript: done,
            } => self.update(&item_id, |item| item.transcript = Some(done)),
            ServerEvent::ResponseAudioDelta { item_id, delta } => {
                let mut events = Vec::new();
                if let Some(item) = self.find_mut(&item_id) {
                    if !item.audio_present {
                        item.audio_present = true;
                        events.push(self.snapshot());
                    }
                }
                let pcm = audio_utils::decode_i16(&delta);
                if !pcm.is_empty() {
                    events.push(RealtimeEvent::AudioDelta { item_id, pcm });
                }
                events
            }
            ServerEvent::ConversationItemTruncated { item_id } => {
                // The spoken part past the cut is gone, and so is its text.
                self.update(&item_id, |item| {
                    item.transcript = None;
                    item.text = None;
                    item.status = ItemStatus::Cancelled;
                })
            }
            ServerEvent::ConversationItemDeleted { item_id } => {
                let before = self.items.len();
                self.items.retain(|item| item.id != item_id);
                if self.items.len() == before {
                    Vec::new()
                } else {
                    vec![self.snapshot()]
                }
            }
            ServerEvent::InputAudioBufferSpeechStarted => {
                vec![RealtimeEvent::ConversationInterrupted]
            }
            ServerEvent::Error { error } => vec![RealtimeEvent::Error(error.message)],
            ServerEvent::Unknown => Vec::new(),
        }
    }

    /// Adds a message item unless one with the same id exists.
    fn insert(&mut self, raw: &ServerItem) -> bool {
        if raw.kind != "message" {
            debug!(item_id = %raw.id, kind = %raw.kind, "Ignoring non-message item");
            return false;
        }
        if self.items.iter().any(|item| item.id == raw.id) {
            return false;
        }
        let Some(role) = raw.role else {
            return false;
        };

        let mut item = ConversationItem::new(raw.id.clone(), role);
        for part in &raw.content {
            match part.kind.as_str() {
                "input_audio" | "audio" => item.audio_present = true,
                _ => {}
            }
            if let Some(text) = part.text.as_ref().filter(|t| !t.is_empty()) {
                item.text.get_or_insert_with(String::new).push_str(text);
            }
            if let Some(transcript) = part.transcript.as_ref().filter(|t| !t.is_empty()) {
                item.transcript = Some(transcript.clone());
            }
        }

        item.status = match role {
            ItemRole::User if item.audio_present && item.transcript.is_none() => {
                if self.transcription_enabled {
                    ItemStatus::InProgress
                } else {
                    ItemStatus::Completed
                }
            }
            ItemRole::User | ItemRole::System => ItemStatus::Completed,
            ItemRole::Assistant => {
                map_status(raw.status.as_deref()).unwrap_or(ItemStatus::InProgress)
            }
        };

        self.items.push(item);
        true
    }

    fn finalize(&mut self, raw: &ServerItem) -> Vec<RealtimeEvent> {
        let mut events = Vec::new();
        if self.insert(raw) {
            events.push(self.snapshot());
        }
        let status = map_status(raw.status.as_deref()).unwrap_or(ItemStatus::Completed);
        let transcript = raw
            .content
            .iter()
            .find_map(|part| part.transcript.clone().or_else(|| part.text.clone()))
            .filter(|t| !t.is_empty());

        let changed = match self.find_mut(&raw.id) {
            Some(item) => {
                let before = item.clone();
                item.status = status;
                if item.transcript.is_none() {
                    item.transcript = transcript;
                }
                *item != before
            }
            None => false,
        };
        if changed {
            events.push(self.snapshot());
        }
        events
    }

    fn update(
        &mut self,
        item_id: &str,
        change: impl FnOnce(&mut ConversationItem),
    ) -> Vec<RealtimeEvent> {
        match self.find_mut(item_id) {
            Some(item) => {
                change(item);
                vec![self.snapshot()]
            }
            None => {
                debug!(item_id = %item_id, "Update for unknown item");
                Vec::new()
            }
        }
    }
}
