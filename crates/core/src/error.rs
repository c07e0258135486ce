//! Error types shared by the session components.

/// Failures of the live session: device acquisition, the remote connection
/// and the operations driven over it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Microphone unavailable: {0}")]
    Microphone(String),
    #[error("Audio output unavailable: {0}")]
    Playback(String),
    #[error("Failed to connect to the realtime service: {0}")]
    Connection(String),
    #[error("Realtime transport error: {0}")]
    Transport(String),
    #[error("No live session is connected")]
    NotConnected,
    #[error("Invalid turn operation: {0}")]
    InvalidTurn(String),
    #[error("The session manager has shut down")]
    ManagerClosed,
}

impl SessionError {
    /// Acquisition errors abort a session start. They are surfaced to the
    /// caller and never retried.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            SessionError::Microphone(_) | SessionError::Playback(_) | SessionError::Connection(_)
        )
    }
}

/// Failures reading or writing persisted history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize history: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Validation failures when editing persona presets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersonaError {
    #[error("Character name is empty")]
    EmptyCharacter,
    #[error("Character name must be at most {0} characters")]
    CharacterTooLong(usize),
    #[error("Instructions are empty")]
    EmptyInstructions,
    #[error("Instructions must be at most {0} characters")]
    InstructionsTooLong(usize),
    #[error("The default preset cannot be deleted")]
    DefaultUndeletable,
    #[error("Preset '{0}' not found")]
    NotFound(String),
}
