//! History Store
//!
//! Archived sessions are persisted as a list of transcripts plus a parallel
//! list of titles. Storage mechanics live behind [`HistoryStore`]; this module
//! owns the invariants: titles stay parallel to sessions, empty sessions are
//! never written, and unchanged snapshots are never rewritten.

use crate::{error::HistoryError, session::Session, transcript::TranscriptEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedHistory {
    pub sessions: Vec<Vec<TranscriptEntry>>,
    pub titles: Vec<String>,
}

impl PersistedHistory {
    /// Builds the snapshot to persist from archived sessions and, when it has
    /// content, the live one.
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        let mut history = Self::default();
        for session in sessions {
            history.sessions.push(session.items.clone());
            history.titles.push(session.title.clone().unwrap_or_default());
        }
        history.without_empty_sessions()
    }

    /// Pads or truncates `titles` to the length of `sessions`.
    pub fn reconciled(mut self) -> Self {
        if self.titles.len() != self.sessions.len() {
            warn!(
                sessions = self.sessions.len(),
                titles = self.titles.len(),
                "Title list out of step with sessions, reconciling"
            );
            self.titles.resize(self.sessions.len(), String::new());
        }
        self
    }

    /// Drops sessions with no items together with their titles.
    pub fn without_empty_sessions(self) -> Self {
        let Self { sessions, titles } = self.reconciled();
        let (sessions, titles) = sessions
            .into_iter()
            .zip(titles)
            .filter(|(items, _)| !items.is_empty())
            .unzip();
        Self { sessions, titles }
    }

    /// Turns the snapshot into archived sessions numbered from zero.
    pub fn into_sessions(self) -> Vec<Session> {
        self.sessions
            .into_iter()
            .zip(self.titles)
            .enumerate()
            .map(|(index, (items, title))| {
                let title = (!title.is_empty()).then_some(title);
                Session::archived(index, items, title)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Logical read/write contract of the persistent store.
#[cfg_attr(test, mockall::automock)]
pub trait HistoryStore: Send {
    /// Reads every archived session and its title.
    ///
    /// # Returns
    ///
    /// An empty history when nothing has been stored yet, or an error when
    /// the stored sessions cannot be read.
    fn load(&self) -> Result<PersistedHistory, HistoryError>;

    /// Replaces the stored history with `history`.
    ///
    /// # Arguments
    ///
    /// * `history` - Sessions and their parallel titles. Empty sessions have
    ///   already been dropped.
    fn save(&self, history: &PersistedHistory) -> Result<(), HistoryError>;
}

/// Reads history, treating unreadable data as no history at all.
pub fn load_history(store: &dyn HistoryStore) -> PersistedHistory {
    match store.load() {
        Ok(history) => {
            let history = history.without_empty_sessions();
            info!(sessions = history.len(), "Loaded conversation history");
            history
        }
        Err(e) => {
            warn!("Discarding unreadable conversation history: {}", e);
            PersistedHistory::default()
        }
    }
}

/// Writes history snapshots, skipping any identical to the last one written
/// or loaded.
pub struct HistoryPersister {
    store: Box<dyn HistoryStore>,
    last_written: PersistedHistory,
}

impl HistoryPersister {
    /// `loaded` must be what was just read from `store`, so the initial
    /// state is never written back.
    pub fn new(store: Box<dyn HistoryStore>, loaded: PersistedHistory) -> Self {
        Self {
            store,
            last_written: loaded,
        }
    }

    /// Returns whether a write happened. Failures are logged and leave the
    /// in-memory conversation untouched.
    pub fn persist(&mut self, snapshot: PersistedHistory) -> bool {
        let snapshot = snapshot.without_empty_sessions();
        if snapshot == self.last_written {
            debug!("History unchanged, skipping save");
            return false;
        }
        match self.store.save(&snapshot) {
            Ok(()) => {
                debug!(sessions = snapshot.len(), "History saved");
                self.last_written = snapshot;
                true
            }
            Err(e) => {
                error!("Failed to save conversation history: {}", e);
                false
            }
        }
    }
}
