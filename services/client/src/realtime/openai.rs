//! Websocket client for the OpenAI Realtime API.

use super::{
    conversation::Conversation,
    wire::{
        ClientEvent, ItemCreate, ServerEvent, SessionUpdate, Transcription, TurnDetection,
    },
};
use crate::audio_utils;
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parley_core::{
    error::SessionError,
    generic_types::{RealtimeEvent, SessionConfig, TurnMode},
    item::ConversationItem,
    realtime_api::RealtimeClient,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::Message as WsMessage,
    },
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where and as whom to connect.
#[derive(Clone, Debug)]
pub struct RealtimeEndpoint {
    pub url: String,
    pub model: String,
    pub api_key: String,
}

pub struct OpenAIRealtimeClient {
    endpoint: RealtimeEndpoint,
    conversation: Arc<Mutex<Conversation>>,
    events: mpsc::Sender<RealtimeEvent>,
    writer: Option<SplitSink<WsStream, WsMessage>>,
    reader: Option<JoinHandle<()>>,
    /// Audio was appended since the input buffer was last committed.
    uncommitted_audio: bool,
}

impl OpenAIRealtimeClient {
    pub fn new(endpoint: RealtimeEndpoint, events: mpsc::Sender<RealtimeEvent>) -> Self {
        Self {
            endpoint,
            conversation: Arc::new(Mutex::new(Conversation::new(true))),
            events,
            writer: None,
            reader: None,
            uncommitted_audio: false,
        }
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::NotConnected)?;
        let payload =
            serde_json::to_string(&event).map_err(|e| SessionError::Transport(e.to_string()))?;
        writer
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}

#[async_trait]
impl RealtimeClient for OpenAIRealtimeClient {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.writer.is_some() {
            return Ok(());
        }
        let url = format!("{}?model={}", self.endpoint.url, self.endpoint.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let bearer = format!("Bearer {}", self.endpoint.api_key)
            .parse::<HeaderValue>()
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let (writer, reader) = ws_stream.split();
        info!(model = %self.endpoint.model, "Connected to OpenAI Realtime API");

        self.writer = Some(writer);
        self.reader = Some(tokio::spawn(read_loop(
            reader,
            self.conversation.clone(),
            self.events.clone(),
        )));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.uncommitted_audio = false;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.send(WsMessage::Close(None)).await {
                debug!("Close frame not delivered: {}", e);
            }
            let _ = writer.close().await;
            info!("Disconnected from OpenAI Realtime API");
        }
        Ok(())
    }

    async fn update_session(&mut self, config: &SessionConfig) -> Result<(), SessionError> {
        lock(&self.conversation).set_transcription_enabled(config.transcription_model.is_some());
        let session = SessionUpdate {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: config.instructions.clone(),
            voice: config.voice,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: config
                .transcription_model
                .clone()
                .map(|model| Transcription { model }),
            turn_detection: match config.turn_detection {
                TurnMode::Manual => None,
                TurnMode::Automatic => Some(TurnDetection::server_vad()),
            },
        };
        self.send(ClientEvent::SessionUpdate { session }).await
    }

    async fn send_user_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ItemCreate::user_text(text),
        })
        .await
    }

    async fn append_input_audio(&mut self, frame: &[i16]) -> Result<(), SessionError> {
        if frame.is_empty() {
            return Ok(());
        }
        self.send(ClientEvent::InputAudioBufferAppend {
            audio: audio_utils::encode_i16(frame),
        })
        .await?;
        self.uncommitted_audio = true;
        Ok(())
    }

    async fn request_response(&mut self) -> Result<(), SessionError> {
        if self.uncommitted_audio {
            self.send(ClientEvent::InputAudioBufferCommit).await?;
            self.uncommitted_audio = false;
        }
        self.send(ClientEvent::ResponseCreate).await
    }

    async fn cancel_response(
        &mut self,
        track_id: &str,
        sample_offset: u64,
    ) -> Result<(), SessionError> {
        self.send(ClientEvent::ResponseCancel).await?;
        self.send(ClientEvent::ConversationItemTruncate {
            item_id: track_id.to_string(),
            content_index: 0,
            audio_end_ms: audio_utils::samples_to_ms(sample_offset),
        })
        .await
    }

    fn items(&self) -> Vec<ConversationItem> {
        lock(&self.conversation).items().to_vec()
    }
}

impl Drop for OpenAIRealtimeClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Folds server events into the conversation and forwards the results in
/// arrival order. Ends with [`RealtimeEvent::Closed`] when the socket does.
async fn read_loop(
    mut reader: SplitStream<WsStream>,
    conversation: Arc<Mutex<Conversation>>,
    events: mpsc::Sender<RealtimeEvent>,
) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                info!(?frame, "Realtime socket closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Realtime socket read failed: {}", e);
                break;
            }
        };
        let event = match serde_json::from_str::<ServerEvent>(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                warn!("Unparseable realtime event: {}", e);
                continue;
            }
        };
        if let ServerEvent::Error { error } = &event {
            warn!(code = ?error.code, "Realtime API error: {}", error.message);
        }
        let outgoing = lock(&conversation).apply(event);
        for event in outgoing {
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
    let _ = events.send(RealtimeEvent::Closed).await;
}
