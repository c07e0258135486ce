//! Session entity and the state published to front ends.

use crate::{
    generic_types::TurnMode,
    item::ItemStatus,
    transcript::TranscriptEntry,
    turn::TurnState,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Preparing,
    Connected,
}

/// One continuous conversation, live or archived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub index: usize,
    pub items: Vec<TranscriptEntry>,
    pub title: Option<String>,
    /// Set the moment title synthesis fires, not when it succeeds.
    pub title_generated: bool,
}

impl Session {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            items: Vec::new(),
            title: None,
            title_generated: false,
        }
    }

    /// A session restored from storage. Its title request, if any, already
    /// happened in an earlier run.
    pub fn archived(index: usize, items: Vec<TranscriptEntry>, title: Option<String>) -> Self {
        Self {
            index,
            items,
            title,
            title_generated: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries that will no longer change.
    pub fn settled_items(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.items
            .iter()
            .filter(|entry| entry.status != ItemStatus::InProgress)
    }

    /// Label for history listings.
    pub fn display_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("Session {}", self.index + 1),
        }
    }
}

/// Snapshot of everything a presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionView {
    pub connection: ConnectionState,
    pub mode: TurnMode,
    pub turn_state: Option<TurnState>,
    pub live_index: usize,
    pub live_items: Vec<TranscriptEntry>,
    pub history: Vec<Session>,
}

impl SessionView {
    /// Titles parallel to `history`; empty where none was generated.
    pub fn titles(&self) -> Vec<String> {
        self.history
            .iter()
            .map(|session| session.title.clone().unwrap_or_default())
            .collect()
    }
}
