//! Conversation Transcript Reconciler
//!
//! Projects the realtime client's raw item snapshot into a stable transcript
//! that can be displayed and persisted. Items keep their identity across
//! updates and are never duplicated; the remote order is authoritative.

use crate::item::{ConversationItem, InputMethod, ItemRole, ItemStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const RECOGNIZING_PLACEHOLDER: &str = "(recognizing voice…)";
pub const MESSAGE_SENT_PLACEHOLDER: &str = "(message sent)";
pub const INTERRUPTED_PLACEHOLDER: &str = "response interrupted";

/// One display/persistence-ready transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub id: String,
    pub role: ItemRole,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Only set for user items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_method: Option<InputMethod>,
    /// Live progress of the underlying item. Not persisted.
    #[serde(skip)]
    pub status: ItemStatus,
}

#[derive(Debug, Clone)]
struct FirstSeen {
    timestamp: DateTime<Utc>,
    input_method: Option<InputMethod>,
}

/// Folds successive item snapshots into transcript entries.
///
/// Attributes that must not change after an item first appears (its
/// timestamp and, for user items, the input method) are memoized by id.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    first_seen: HashMap<String, FirstSeen>,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Projects the current snapshot. Duplicate ids collapse into a single
    /// entry at the position the id first appeared, carrying the latest state.
    pub fn reconcile(&mut self, items: &[ConversationItem]) -> Vec<TranscriptEntry> {
        self.reconcile_at(items, Utc::now())
    }

    fn reconcile_at(
        &mut self,
        items: &[ConversationItem],
        now: DateTime<Utc>,
    ) -> Vec<TranscriptEntry> {
        let mut entries: Vec<TranscriptEntry> = Vec::with_capacity(items.len());
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(items.len());

        for item in items {
            let entry = self.project(item, now);
            match positions.get(item.id.as_str()) {
                Some(&pos) => entries[pos] = entry,
                None => {
                    positions.insert(item.id.as_str(), entries.len());
                    entries.push(entry);
                }
            }
        }
        entries
    }

    fn project(&mut self, item: &ConversationItem, now: DateTime<Utc>) -> TranscriptEntry {
        let seen = self
            .first_seen
            .entry(item.id.clone())
            .or_insert_with(|| FirstSeen {
                timestamp: now,
                input_method: initial_input_method(item),
            });

        TranscriptEntry {
            id: item.id.clone(),
            role: item.role,
            text: project_text(item),
            timestamp: seen.timestamp,
            input_method: seen.input_method,
            status: item.status,
        }
    }

    /// Forgets memoized attributes; called when a new live session begins.
    pub fn reset(&mut self) {
        self.first_seen.clear();
    }
}

fn initial_input_method(item: &ConversationItem) -> Option<InputMethod> {
    match item.role {
        ItemRole::User if item.audio_present => Some(InputMethod::Voice),
        ItemRole::User => Some(InputMethod::Text),
        _ => None,
    }
}

/// Text shown for an item: finalized transcript, then accumulated text, then
/// a per-role placeholder.
pub fn project_text(item: &ConversationItem) -> String {
    if let Some(text) = item.best_text() {
        return text.to_string();
    }
    let placeholder = match item.role {
        ItemRole::User if item.audio_present && item.status == ItemStatus::InProgress => {
            RECOGNIZING_PLACEHOLDER
        }
        ItemRole::User => MESSAGE_SENT_PLACEHOLDER,
        ItemRole::Assistant if item.status == ItemStatus::Cancelled => INTERRUPTED_PLACEHOLDER,
        _ => "",
    };
    placeholder.to_string()
}
