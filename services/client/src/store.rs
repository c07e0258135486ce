//! JSON key/value store on the local filesystem.
//!
//! Each key is one `{key}.json` file in the data directory. Writes go to a
//! temporary file first and are renamed into place.

use parley_core::{
    error::HistoryError,
    history::{HistoryStore, PersistedHistory},
    persona::{Persona, PersonaBook},
    transcript::TranscriptEntry,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub const HISTORY_KEY: &str = "conversation-history";
pub const TITLES_KEY: &str = "conversation-titles";
pub const PERSONAS_KEY: &str = "setting-contents";

#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reads a key. A missing file is `None`.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, HistoryError> {
        let contents = match fs::read_to_string(self.path(key)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), HistoryError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        debug!(key, "Stored");
        Ok(())
    }

    /// Saved persona presets. Unreadable settings fall back to the built-in
    /// default preset.
    pub fn load_personas(&self) -> PersonaBook {
        match self.read::<Vec<Persona>>(PERSONAS_KEY) {
            Ok(Some(presets)) => PersonaBook::from_saved(presets),
            Ok(None) => PersonaBook::default(),
            Err(e) => {
                warn!("Failed to load persona presets, using defaults: {}", e);
                PersonaBook::default()
            }
        }
    }

    pub fn save_personas(&self, book: &PersonaBook) -> Result<(), HistoryError> {
        self.write(PERSONAS_KEY, book.presets())
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Result<PersistedHistory, HistoryError> {
        let sessions = self
            .read::<Vec<Vec<TranscriptEntry>>>(HISTORY_KEY)?
            .unwrap_or_default();
        // An unreadable titles file leaves the sessions untitled.
        let titles = match self.read::<Vec<String>>(TITLES_KEY) {
            Ok(titles) => titles.unwrap_or_default(),
            Err(e) => {
                warn!("Unreadable conversation titles, keeping sessions untitled: {}", e);
                Vec::new()
            }
        };
        Ok(PersistedHistory { sessions, titles })
    }

    fn save(&self, history: &PersistedHistory) -> Result<(), HistoryError> {
        self.write(HISTORY_KEY, &history.sessions)?;
        self.write(TITLES_KEY, &history.titles)
    }
}
