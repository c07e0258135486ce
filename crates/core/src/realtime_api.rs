//! Contracts for the collaborators a live session drives.
//!
//! The session manager never talks to sockets or sound devices directly. It
//! receives one [`RealtimeClient`] and one [`AudioTransport`] per live session
//! from a [`SessionFactory`], owns them exclusively for the session's
//! duration, and drops them when the session ends.

use crate::{
    error::SessionError,
    generic_types::{RealtimeEvent, SessionConfig, TrackOffset},
    item::ConversationItem,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Mono PCM16 samples at [`crate::generic_types::REALTIME_SAMPLE_RATE`].
pub type AudioFrame = Vec<i16>;

/// Destination for captured audio frames while recording.
pub type FrameSink = mpsc::Sender<AudioFrame>;

/// The socket connection to the speech-capable assistant.
#[async_trait]
pub trait RealtimeClient: Send {
    /// Opens the connection. Inbound events start flowing to the receiver
    /// handed out alongside this client.
    ///
    /// # Returns
    ///
    /// `SessionError::Connection` if the service cannot be reached or
    /// refuses the handshake.
    async fn connect(&mut self) -> Result<(), SessionError>;

    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Applies instructions, voice, transcription and turn detection.
    ///
    /// # Arguments
    ///
    /// * `config` - The full configuration; `turn_detection` of
    ///   `TurnMode::Manual` disables server-side voice activity detection.
    async fn update_session(&mut self, config: &SessionConfig) -> Result<(), SessionError>;

    /// Adds a typed user message to the conversation.
    async fn send_user_text(&mut self, text: &str) -> Result<(), SessionError>;

    /// Streams captured microphone audio to the input buffer.
    async fn append_input_audio(&mut self, frame: &[i16]) -> Result<(), SessionError>;

    /// Asks the assistant to respond to what has been sent so far.
    async fn request_response(&mut self) -> Result<(), SessionError>;

    /// Abandons the in-flight response, truncating the spoken item at the
    /// point playback actually stopped.
    ///
    /// # Arguments
    ///
    /// * `track_id` - Id of the assistant item whose audio was cut off.
    /// * `sample_offset` - Samples of that item actually played, at
    ///   `REALTIME_SAMPLE_RATE`.
    async fn cancel_response(
        &mut self,
        track_id: &str,
        sample_offset: u64,
    ) -> Result<(), SessionError>;

    /// All items the client currently knows about, in remote order.
    fn items(&self) -> Vec<ConversationItem>;
}

/// Microphone capture and speaker playback.
#[async_trait]
pub trait AudioTransport: Send {
    /// Acquires the microphone without streaming frames yet.
    async fn begin_capture(&mut self) -> Result<(), SessionError>;

    /// Starts delivering captured frames to `sink`.
    ///
    /// # Arguments
    ///
    /// * `sink` - Receives mono PCM16 frames at the realtime sample rate
    ///   until capture is paused or ended. Full sinks drop frames.
    ///
    /// # Returns
    ///
    /// An error if capture has not begun.
    async fn record(&mut self, sink: FrameSink) -> Result<(), SessionError>;

    /// Stops delivering frames but keeps the microphone.
    async fn pause_capture(&mut self) -> Result<(), SessionError>;

    /// Releases the microphone.
    async fn end_capture(&mut self) -> Result<(), SessionError>;

    async fn connect_playback(&mut self) -> Result<(), SessionError>;

    /// Queues synthesized speech under the given track id.
    fn enqueue_playback(&mut self, pcm: &[i16], track_id: &str);

    /// Stops playback immediately and clears the queue.
    ///
    /// # Returns
    ///
    /// Where the current track was cut off, or `None` if nothing was playing.
    async fn interrupt_playback(&mut self) -> Option<TrackOffset>;
}

/// The resources of one live session.
pub struct SessionParts {
    pub client: Box<dyn RealtimeClient>,
    pub audio: Box<dyn AudioTransport>,
    /// Inbound events of `client`, in remote order.
    pub events: mpsc::Receiver<RealtimeEvent>,
}

/// Builds fresh, unconnected session resources.
pub trait SessionFactory: Send {
    /// Called once per session start. Nothing is acquired until the manager
    /// drives the returned parts.
    ///
    /// # Returns
    ///
    /// A client, an audio transport and the client's event receiver, none
    /// shared with any earlier session.
    fn create(&mut self) -> Result<SessionParts, SessionError>;
}
