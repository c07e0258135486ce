//! Session Lifecycle Manager
//!
//! A single task owns the live session's client and audio transport, the
//! transcript, the archive and the history writer. Commands from front ends,
//! remote events, captured audio frames and title results all funnel into that
//! task and are handled one at a time, so a session is always fully torn down
//! before its successor is built.

use crate::{
    error::SessionError,
    generic_types::{RealtimeEvent, SessionConfig},
    history::{HistoryPersister, HistoryStore, PersistedHistory, load_history},
    item::ConversationItem,
    persona::Persona,
    realtime_api::{AudioFrame, AudioTransport, RealtimeClient, SessionFactory, SessionParts},
    session::{ConnectionState, Session, SessionView},
    title::{TitleService, clean_title, title_inputs},
    transcript::{TranscriptEntry, TranscriptReconciler},
    turn::{TurnController, TurnState},
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

const COMMAND_BUFFER: usize = 32;
const FRAME_BUFFER: usize = 256;
const TITLE_BUFFER: usize = 8;

/// Operations front ends can request.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Start,
    End,
    StartNewSession,
    SendTextMessage(String),
    PressToTalkStart,
    PressToTalkStop,
    ToggleCaptureMode,
    ApplyPersona(Persona),
    Shutdown,
}

struct Request {
    command: SessionCommand,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

/// Result of one title request for the session at `ordinal`.
struct TitleOutcome {
    ordinal: usize,
    result: anyhow::Result<String>,
}

/// Resources bound to the current connection.
struct LiveSession {
    client: Box<dyn RealtimeClient>,
    audio: Box<dyn AudioTransport>,
    events: mpsc::Receiver<RealtimeEvent>,
}

pub struct SessionManager {
    factory: Box<dyn SessionFactory>,
    titles: Arc<dyn TitleService>,
    persister: HistoryPersister,
    config: SessionConfig,
    turn: TurnController,
    reconciler: TranscriptReconciler,
    connection: ConnectionState,
    active: Option<LiveSession>,
    live: Session,
    /// Settled live entries as of the last snapshot handed to the persister.
    persisted_live: Vec<TranscriptEntry>,
    archived: Vec<Session>,
    frames_tx: mpsc::Sender<AudioFrame>,
    frames_rx: mpsc::Receiver<AudioFrame>,
    title_tx: mpsc::Sender<TitleOutcome>,
    title_rx: mpsc::Receiver<TitleOutcome>,
    view_tx: watch::Sender<SessionView>,
}

impl SessionManager {
    /// Loads history from `store`; the first live ordinal is the number of
    /// sessions loaded.
    pub fn new(
        factory: Box<dyn SessionFactory>,
        store: Box<dyn HistoryStore>,
        titles: Arc<dyn TitleService>,
        config: SessionConfig,
    ) -> Self {
        let loaded = load_history(store.as_ref());
        let archived = loaded.clone().into_sessions();
        let live = Session::new(archived.len());
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let (title_tx, title_rx) = mpsc::channel(TITLE_BUFFER);
        let turn = TurnController::new(config.turn_detection);

        let mut manager = Self {
            factory,
            titles,
            persister: HistoryPersister::new(store, loaded),
            config,
            turn,
            reconciler: TranscriptReconciler::new(),
            connection: ConnectionState::Disconnected,
            active: None,
            live,
            persisted_live: Vec::new(),
            archived,
            frames_tx,
            frames_rx,
            title_tx,
            title_rx,
            view_tx: watch::Sender::new(SessionView::default()),
        };
        manager.publish();
        manager
    }

    /// Moves the manager onto its own task and returns the handle front ends
    /// use to drive it.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SessionHandle {
            commands: commands_tx,
            view: self.view_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        info!(ordinal = self.live.index, "Session manager running");
        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        debug!("All session handles dropped");
                        break;
                    };
                    let shutdown = matches!(command, SessionCommand::Shutdown);
                    let result = self.execute(command).await;
                    let _ = reply.send(result);
                    if shutdown {
                        break;
                    }
                }
                event = next_event(&mut self.active) => {
                    // A dropped event stream means the client is gone.
                    self.handle_event(event.unwrap_or(RealtimeEvent::Closed)).await;
                }
                Some(frame) = self.frames_rx.recv() => {
                    self.forward_frame(frame).await;
                }
                Some(outcome) = self.title_rx.recv() => {
                    self.apply_title(outcome);
                }
            }
        }
        let _ = self.end().await;
        info!("Session manager stopped");
    }

    async fn execute(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        debug!(?command, "Executing session command");
        let result = match command {
            SessionCommand::Start => self.start().await,
            SessionCommand::End | SessionCommand::Shutdown => self.end().await,
            SessionCommand::StartNewSession => self.start_new_session().await,
            SessionCommand::SendTextMessage(text) => self.send_text_message(&text).await,
            SessionCommand::PressToTalkStart => self.press_to_talk_start().await,
            SessionCommand::PressToTalkStop => self.press_to_talk_stop().await,
            SessionCommand::ToggleCaptureMode => self.toggle_capture_mode().await,
            SessionCommand::ApplyPersona(persona) => self.apply_persona(persona).await,
        };
        self.publish();
        result
    }

    /// Acquires the microphone, the output path and the connection, then
    /// configures the remote session. Any failure releases whatever was
    /// acquired and leaves the manager disconnected.
    #[instrument(skip_all, fields(ordinal = self.live.index))]
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.connection != ConnectionState::Disconnected {
            debug!(state = ?self.connection, "Start ignored, session already active");
            return Ok(());
        }
        self.connection = ConnectionState::Preparing;
        self.publish();

        let SessionParts {
            mut client,
            mut audio,
            events,
        } = match self.factory.create() {
            Ok(parts) => parts,
            Err(e) => return Err(self.abort_start(e)),
        };

        if let Err(e) = audio.begin_capture().await {
            return Err(self.abort_start(e));
        }

        let config = self.session_config();
        let mut connected = false;
        let acquired = async {
            audio.connect_playback().await?;
            client.connect().await?;
            connected = true;
            client.update_session(&config).await
        }
        .await;

        if let Err(e) = acquired {
            if connected {
                if let Err(e) = client.disconnect().await {
                    warn!("Disconnect after failed start: {}", e);
                }
            }
            if let Err(e) = audio.end_capture().await {
                warn!("Releasing microphone after failed start: {}", e);
            }
            audio.interrupt_playback().await;
            return Err(self.abort_start(e));
        }

        let seeded = client.items();
        self.live.items = self.reconciler.reconcile(&seeded);
        self.active = Some(LiveSession {
            client,
            audio,
            events,
        });
        self.connection = ConnectionState::Connected;

        let begun = match self.active.as_mut() {
            Some(live) => {
                self.turn
                    .begin_session(live.audio.as_mut(), &self.frames_tx)
                    .await
            }
            None => Err(SessionError::NotConnected),
        };
        if let Err(e) = begun {
            error!("Failed to begin capture: {}", e);
            let _ = self.end().await;
            return Err(e);
        }

        info!(mode = ?self.turn.mode(), "Session connected");
        self.publish();
        Ok(())
    }

    fn abort_start(&mut self, e: SessionError) -> SessionError {
        error!("Failed to start session: {}", e);
        self.connection = ConnectionState::Disconnected;
        self.turn.reset();
        self.publish();
        e
    }

    /// Disconnects, releases the microphone and silences playback, in that
    /// order. Teardown failures are logged; the session ends regardless.
    #[instrument(skip_all, fields(ordinal = self.live.index))]
    pub async fn end(&mut self) -> Result<(), SessionError> {
        self.connection = ConnectionState::Disconnected;
        self.turn.reset();
        let Some(mut live) = self.active.take() else {
            return Ok(());
        };
        self.publish();

        if let Err(e) = live.client.disconnect().await {
            warn!("Error while disconnecting: {}", e);
        }
        if let Err(e) = live.audio.end_capture().await {
            warn!("Error while releasing the microphone: {}", e);
        }
        live.audio.interrupt_playback().await;

        // Frames captured before the microphone was released belong to the
        // old connection.
        while self.frames_rx.try_recv().is_ok() {}

        info!("Session ended");
        Ok(())
    }

    /// Ends the live session, archives it if it has content, and starts a
    /// fresh one. An empty session is reused under the same ordinal.
    #[instrument(skip_all, fields(ordinal = self.live.index))]
    pub async fn start_new_session(&mut self) -> Result<(), SessionError> {
        self.end().await?;

        if self.live.is_empty() {
            debug!("Live session empty, nothing to archive");
        } else {
            let next = Session::new(self.live.index + 1);
            let finished = std::mem::replace(&mut self.live, next);
            info!(
                archived = finished.index,
                items = finished.items.len(),
                "Session archived"
            );
            self.archived.push(finished);
        }
        self.live.items.clear();
        self.reconciler.reset();
        self.persist();
        self.publish();

        self.start().await
    }

    pub async fn send_text_message(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidTurn("message is empty".into()));
        }
        let live = self.active.as_mut().ok_or(SessionError::NotConnected)?;
        live.client.send_user_text(text).await?;
        live.client.request_response().await
    }

    pub async fn press_to_talk_start(&mut self) -> Result<(), SessionError> {
        let live = self.active.as_mut().ok_or(SessionError::NotConnected)?;
        self.turn
            .press(live.audio.as_mut(), live.client.as_mut(), &self.frames_tx)
            .await
    }

    pub async fn press_to_talk_stop(&mut self) -> Result<(), SessionError> {
        let live = self.active.as_mut().ok_or(SessionError::NotConnected)?;
        self.turn
            .release(
                live.audio.as_mut(),
                live.client.as_mut(),
                &mut self.frames_rx,
            )
            .await
    }

    /// Flips between push-to-talk and automatic turn detection. Without a
    /// live session the new mode applies to the next connection.
    pub async fn toggle_capture_mode(&mut self) -> Result<(), SessionError> {
        let mode = self.turn.mode().toggled();
        self.config.turn_detection = mode;
        match self.active.as_mut() {
            Some(live) => {
                self.turn
                    .switch_mode(
                        mode,
                        &self.config,
                        live.audio.as_mut(),
                        live.client.as_mut(),
                        &self.frames_tx,
                    )
                    .await
            }
            None => {
                self.turn.set_mode(mode);
                Ok(())
            }
        }
    }

    /// Applies a preset's instructions and voice, then starts a new session
    /// so they take effect.
    pub async fn apply_persona(&mut self, persona: Persona) -> Result<(), SessionError> {
        info!(id = %persona.id, character = %persona.character, "Applying persona");
        self.config.instructions = persona.instructions;
        self.config.voice = persona.voice;
        self.start_new_session().await
    }

    async fn handle_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::ItemsChanged(items) => self.on_items_changed(&items),
            RealtimeEvent::AudioDelta { item_id, pcm } => {
                if let Some(live) = self.active.as_mut() {
                    live.audio.enqueue_playback(&pcm, &item_id);
                }
            }
            RealtimeEvent::ConversationInterrupted => {
                if let Some(live) = self.active.as_mut() {
                    if let Err(e) = self
                        .turn
                        .on_interrupted(live.audio.as_mut(), live.client.as_mut())
                        .await
                    {
                        warn!("Failed to cancel interrupted response: {}", e);
                    }
                }
            }
            RealtimeEvent::Error(message) => {
                warn!("Realtime service reported an error: {}", message);
            }
            RealtimeEvent::Closed => {
                if self.active.is_some() {
                    warn!("Realtime connection closed by remote");
                    let _ = self.end().await;
                    self.publish();
                }
            }
        }
    }

    fn on_items_changed(&mut self, items: &[ConversationItem]) {
        self.live.items = self.reconciler.reconcile(items);
        self.maybe_request_title();
        if self.live_settled_changed() {
            self.persist();
        }
        self.publish();
    }

    /// Streaming deltas only touch in-progress entries, which are never
    /// persisted.
    fn live_settled_changed(&self) -> bool {
        !self.live.settled_items().eq(self.persisted_live.iter())
    }

    /// Fires at most once per session: the flag is set before the request
    /// goes out.
    fn maybe_request_title(&mut self) {
        if self.live.title_generated {
            return;
        }
        let Some((user, assistant)) = title_inputs(&self.live.items) else {
            return;
        };
        self.live.title_generated = true;

        let ordinal = self.live.index;
        let service = self.titles.clone();
        let results = self.title_tx.clone();
        debug!(ordinal, "Requesting session title");
        tokio::spawn(async move {
            let result = service.generate_title(&user, &assistant).await;
            let _ = results.send(TitleOutcome { ordinal, result }).await;
        });
    }

    fn apply_title(&mut self, outcome: TitleOutcome) {
        let TitleOutcome { ordinal, result } = outcome;
        let title = match result {
            Ok(raw) => clean_title(&raw),
            Err(e) => {
                warn!(ordinal, "Title generation failed: {:#}", e);
                return;
            }
        };
        let session = if self.live.index == ordinal {
            Some(&mut self.live)
        } else {
            self.archived.iter_mut().find(|s| s.index == ordinal)
        };
        match session {
            Some(session) => {
                info!(ordinal, title = %title, "Session titled");
                session.title = Some(title);
                self.persist();
                self.publish();
            }
            None => warn!(ordinal, "Title arrived for unknown session"),
        }
    }

    async fn forward_frame(&mut self, frame: AudioFrame) {
        if self.turn.state() == TurnState::Idle {
            return;
        }
        let Some(live) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = live.client.append_input_audio(&frame).await {
            warn!("Failed to stream audio frame: {}", e);
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            turn_detection: self.turn.mode(),
            ..self.config.clone()
        }
    }

    /// Archived sessions plus the settled part of the live one.
    fn persist(&mut self) {
        self.persisted_live = self.live.settled_items().cloned().collect();
        let live = Session {
            items: self.persisted_live.clone(),
            title: self.live.title.clone(),
            ..Session::new(self.live.index)
        };
        let snapshot = PersistedHistory::from_sessions(self.archived.iter().chain([&live]));
        self.persister.persist(snapshot);
    }

    fn view(&self) -> SessionView {
        SessionView {
            connection: self.connection,
            mode: self.turn.mode(),
            turn_state: self.active.as_ref().map(|_| self.turn.state()),
            live_index: self.live.index,
            live_items: self.live.items.clone(),
            history: self.archived.clone(),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

async fn next_event(active: &mut Option<LiveSession>) -> Option<RealtimeEvent> {
    match active {
        Some(live) => live.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable front-end handle to a running [`SessionManager`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Request>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    async fn request(&self, command: SessionCommand) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| SessionError::ManagerClosed)?;
        response.await.map_err(|_| SessionError::ManagerClosed)?
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Start).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::End).await
    }

    pub async fn start_new_session(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::StartNewSession).await
    }

    pub async fn send_text_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.request(SessionCommand::SendTextMessage(text.into()))
            .await
    }

    pub async fn press_to_talk_start(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::PressToTalkStart).await
    }

    pub async fn press_to_talk_stop(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::PressToTalkStop).await
    }

    pub async fn toggle_capture_mode(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::ToggleCaptureMode).await
    }

    pub async fn apply_persona(&self, persona: Persona) -> Result<(), SessionError> {
        self.request(SessionCommand::ApplyPersona(persona)).await
    }

    /// Ends the live session and stops the manager task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fakes::{Call, FakeFactory, MemoryStore, calls},
        generic_types::{TrackOffset, TurnMode, Voice},
        item::{ItemRole, ItemStatus},
        title::{MockTitleService, OfflineTitleService},
        transcript::TranscriptEntry,
    };
    use chrono::Utc;
    use std::sync::{Mutex, atomic::Ordering};
    use std::time::Duration;

    fn config(mode: TurnMode) -> SessionConfig {
        SessionConfig {
            instructions: "Be brief.".into(),
            turn_detection: mode,
            ..SessionConfig::default()
        }
    }

    fn manager_with(
        factory: &FakeFactory,
        store: &MemoryStore,
        titles: Arc<dyn TitleService>,
        mode: TurnMode,
    ) -> SessionManager {
        SessionManager::new(
            Box::new(factory.clone()),
            Box::new(store.clone()),
            titles,
            config(mode),
        )
    }

    fn manager(factory: &FakeFactory, store: &MemoryStore, mode: TurnMode) -> SessionManager {
        manager_with(factory, store, Arc::new(OfflineTitleService), mode)
    }

    fn assistant(id: &str, text: &str) -> ConversationItem {
        ConversationItem {
            status: ItemStatus::Completed,
            transcript: Some(text.into()),
            audio_present: true,
            ..ConversationItem::new(id, ItemRole::Assistant)
        }
    }

    fn hello_exchange() -> Vec<ConversationItem> {
        vec![
            ConversationItem::user_text("u1", "Hello"),
            assistant("a1", "Hi there"),
        ]
    }

    fn stored_entry(id: &str) -> TranscriptEntry {
        TranscriptEntry {
            id: id.into(),
            role: ItemRole::User,
            text: "earlier".into(),
            timestamp: Utc::now(),
            input_method: None,
            status: ItemStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_fresh_start_has_ordinal_zero_and_no_history() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let manager = manager(&factory, &store, TurnMode::Automatic);

        let view = manager.view();
        assert_eq!(view.live_index, 0);
        assert!(view.history.is_empty());
        assert_eq!(view.connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_initial_ordinal_follows_loaded_history() {
        let factory = FakeFactory::new();
        let store = MemoryStore::with_history(PersistedHistory {
            sessions: vec![vec![stored_entry("x1")], vec![stored_entry("x2")]],
            titles: vec!["First".into(), "Second".into()],
        });
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        assert_eq!(manager.view().live_index, 2);
        assert_eq!(manager.view().history[1].title.as_deref(), Some("Second"));

        manager.start().await.unwrap();
        manager.on_items_changed(&[]);
        assert!(store.writes().is_empty(), "loaded history was rewritten");
    }

    #[tokio::test]
    async fn test_start_acquires_in_order_and_listens() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        manager.start().await.unwrap();

        assert_eq!(manager.view().connection, ConnectionState::Connected);
        assert_eq!(manager.view().turn_state, Some(TurnState::AutoListening));
        assert_eq!(
            calls(&factory.log),
            vec![
                Call::BeginCapture,
                Call::ConnectPlayback,
                Call::Connect,
                Call::UpdateSession(TurnMode::Automatic),
                Call::Record,
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_start_is_ignored() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Manual);

        manager.start().await.unwrap();
        manager.start().await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_leaves_disconnected() {
        let factory = FakeFactory::new();
        *factory.fail_connect.lock().unwrap() = true;
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        let err = manager.start().await.unwrap_err();

        assert!(err.is_acquisition());
        assert_eq!(manager.view().connection, ConnectionState::Disconnected);
        assert!(manager.active.is_none());
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 0);
        assert_eq!(
            calls(&factory.log),
            vec![
                Call::BeginCapture,
                Call::ConnectPlayback,
                Call::Connect,
                Call::EndCapture,
                Call::Interrupt,
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_session_update_disconnects_and_releases() {
        let factory = FakeFactory::new();
        *factory.fail_update.lock().unwrap() = true;
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        let err = manager.start().await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(manager.view().connection, ConnectionState::Disconnected);
        assert_eq!(manager.view().turn_state, None);
        assert!(manager.active.is_none());
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 0);
        assert_eq!(
            calls(&factory.log),
            vec![
                Call::BeginCapture,
                Call::ConnectPlayback,
                Call::Connect,
                Call::UpdateSession(TurnMode::Automatic),
                Call::Disconnect,
                Call::EndCapture,
                Call::Interrupt,
            ]
        );

        // The next attempt starts from scratch.
        *factory.fail_update.lock().unwrap() = false;
        manager.start().await.unwrap();
        assert_eq!(manager.view().connection, ConnectionState::Connected);
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_microphone_failure_is_surfaced_without_retry() {
        let factory = FakeFactory::new();
        *factory.fail_begin.lock().unwrap() = true;
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        let err = manager.start().await.unwrap_err();

        assert!(matches!(err, SessionError::Microphone(_)));
        assert_eq!(manager.view().connection, ConnectionState::Disconnected);
        assert_eq!(calls(&factory.log), vec![Call::BeginCapture]);
    }

    #[tokio::test]
    async fn test_end_tears_down_in_order() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Manual);
        manager.start().await.unwrap();
        factory.log.lock().unwrap().clear();

        manager.end().await.unwrap();

        assert_eq!(manager.view().connection, ConnectionState::Disconnected);
        assert_eq!(
            calls(&factory.log),
            vec![Call::Disconnect, Call::EndCapture, Call::Interrupt]
        );
    }

    #[tokio::test]
    async fn test_new_session_on_empty_session_keeps_ordinal() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();

        manager.start_new_session().await.unwrap();

        let view = manager.view();
        assert_eq!(view.live_index, 0);
        assert!(view.history.is_empty());
        assert_eq!(view.connection, ConnectionState::Connected);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_new_session_archives_non_empty_session() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();
        manager.on_items_changed(&hello_exchange());

        manager.start_new_session().await.unwrap();

        let view = manager.view();
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].index, 0);
        assert_eq!(view.live_index, 1);
        assert!(view.live_items.is_empty());
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_three_sessions_one_empty_persists_two() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();

        manager.on_items_changed(&hello_exchange());
        manager.start_new_session().await.unwrap();
        // Accidental tap with no input.
        manager.start_new_session().await.unwrap();
        manager.on_items_changed(&[ConversationItem::user_text("u9", "Another topic")]);
        manager.start_new_session().await.unwrap();

        let last = store.writes().pop().unwrap();
        assert_eq!(last.sessions.len(), 2);
        assert_eq!(last.titles.len(), 2);
        assert!(last.sessions.iter().all(|items| !items.is_empty()));
        assert_eq!(manager.view().live_index, 2);
    }

    #[tokio::test]
    async fn test_streaming_deltas_do_not_rewrite_history() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();

        let user = ConversationItem::user_text("u1", "Hello");
        manager.on_items_changed(&[user.clone()]);
        assert_eq!(store.writes().len(), 1);

        for partial in ["Hi", "Hi th", "Hi there"] {
            let streaming = ConversationItem {
                transcript: Some(partial.into()),
                audio_present: true,
                ..ConversationItem::new("a1", ItemRole::Assistant)
            };
            manager.on_items_changed(&[user.clone(), streaming]);
            assert!(!manager.live_settled_changed());
        }
        assert_eq!(store.writes().len(), 1);
        assert_eq!(manager.view().live_items[1].text, "Hi there");

        manager.on_items_changed(&hello_exchange());
        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].sessions[0].len(), 2);
    }

    #[tokio::test]
    async fn test_title_requested_once_per_session() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut titles = MockTitleService::new();
        let recorded = seen.clone();
        titles
            .expect_generate_title()
            .times(1)
            .returning(move |user, assistant| {
                recorded
                    .lock()
                    .unwrap()
                    .push((user.to_string(), assistant.to_string()));
                Ok("\"Greeting\"".to_string())
            });
        let mut manager = manager_with(&factory, &store, Arc::new(titles), TurnMode::Automatic);
        manager.start().await.unwrap();

        let mut items = hello_exchange();
        manager.on_items_changed(&items);
        items.push(ConversationItem::user_text("u2", "More"));
        items.push(assistant("a2", "Sure"));
        manager.on_items_changed(&items);
        manager.on_items_changed(&items);

        let outcome = manager.title_rx.recv().await.unwrap();
        manager.apply_title(outcome);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("Hello".to_string(), "Hi there".to_string())]
        );
        assert_eq!(manager.live.title.as_deref(), Some("Greeting"));
        assert_eq!(store.writes().pop().unwrap().titles, vec!["Greeting".to_string()]);
    }

    #[tokio::test]
    async fn test_late_title_lands_on_archived_session() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();
        manager.on_items_changed(&hello_exchange());
        manager.start_new_session().await.unwrap();

        let outcome = manager.title_rx.recv().await.unwrap();
        manager.apply_title(outcome);

        let view = manager.view();
        assert_eq!(view.history[0].title.as_deref(), Some("Hello"));
        assert!(!manager.live.title_generated);
    }

    #[tokio::test]
    async fn test_failed_title_leaves_title_unset() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut titles = MockTitleService::new();
        titles
            .expect_generate_title()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("rate limited")));
        let mut manager = manager_with(&factory, &store, Arc::new(titles), TurnMode::Automatic);
        manager.start().await.unwrap();
        manager.on_items_changed(&hello_exchange());

        let outcome = manager.title_rx.recv().await.unwrap();
        manager.apply_title(outcome);
        manager.on_items_changed(&hello_exchange());

        assert_eq!(manager.live.title, None);
        assert!(manager.live.title_generated);
    }

    #[tokio::test]
    async fn test_interruption_cancels_at_playback_offset() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();
        *factory.interrupt_result.lock().unwrap() = Some(TrackOffset {
            track_id: "a1".into(),
            sample_offset: 36_000,
        });
        factory.log.lock().unwrap().clear();

        manager
            .handle_event(RealtimeEvent::ConversationInterrupted)
            .await;

        assert_eq!(
            calls(&factory.log),
            vec![Call::Interrupt, Call::CancelResponse("a1".into(), 36_000)]
        );
    }

    #[tokio::test]
    async fn test_audio_delta_is_queued_under_item_id() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();
        factory.log.lock().unwrap().clear();

        manager
            .handle_event(RealtimeEvent::AudioDelta {
                item_id: "a1".into(),
                pcm: vec![0; 480],
            })
            .await;

        assert_eq!(calls(&factory.log), vec![Call::Enqueue("a1".into())]);
    }

    #[tokio::test]
    async fn test_frames_forwarded_only_while_capturing() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Manual);
        manager.start().await.unwrap();
        factory.log.lock().unwrap().clear();

        manager.forward_frame(vec![0; 240]).await;
        manager.press_to_talk_start().await.unwrap();
        manager.forward_frame(vec![0; 480]).await;
        manager.press_to_talk_stop().await.unwrap();

        assert_eq!(
            calls(&factory.log),
            vec![
                Call::Interrupt,
                Call::Record,
                Call::AppendAudio(480),
                Call::PauseCapture,
                Call::RequestResponse,
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_sends_frames_queued_before_release() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Manual);
        manager.start().await.unwrap();
        manager.press_to_talk_start().await.unwrap();
        factory.log.lock().unwrap().clear();

        // Captured but not yet picked up by the run loop.
        manager.frames_tx.send(vec![0; 240]).await.unwrap();
        manager.frames_tx.send(vec![0; 240]).await.unwrap();
        manager.press_to_talk_stop().await.unwrap();

        assert_eq!(
            calls(&factory.log),
            vec![
                Call::PauseCapture,
                Call::AppendAudio(240),
                Call::AppendAudio(240),
                Call::RequestResponse,
            ]
        );
        assert!(manager.frames_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_text_requires_connection() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        assert_eq!(
            manager.send_text_message("Hello").await.unwrap_err(),
            SessionError::NotConnected
        );

        manager.start().await.unwrap();
        factory.log.lock().unwrap().clear();
        manager.send_text_message("  Hello ").await.unwrap();
        assert_eq!(
            calls(&factory.log),
            vec![Call::SendText("Hello".into()), Call::RequestResponse]
        );
    }

    #[tokio::test]
    async fn test_toggle_mode_while_disconnected_applies_to_next_start() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);

        manager.toggle_capture_mode().await.unwrap();
        manager.start().await.unwrap();

        assert_eq!(manager.view().mode, TurnMode::Manual);
        assert!(calls(&factory.log).contains(&Call::UpdateSession(TurnMode::Manual)));
        assert!(!calls(&factory.log).contains(&Call::Record));
    }

    #[tokio::test]
    async fn test_apply_persona_reconfigures_and_restarts() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();

        let persona = Persona {
            id: "p1".into(),
            character: "Pirate".into(),
            instructions: "Talk like a pirate.".into(),
            voice: Voice::Verse,
        };
        manager.apply_persona(persona).await.unwrap();

        assert_eq!(manager.config.voice, Voice::Verse);
        assert_eq!(manager.config.instructions, "Talk like a pirate.");
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.view().connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_remote_close_disconnects() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let mut manager = manager(&factory, &store, TurnMode::Automatic);
        manager.start().await.unwrap();

        manager.handle_event(RealtimeEvent::Error("boom".into())).await;
        assert_eq!(manager.view().connection, ConnectionState::Connected);

        manager.handle_event(RealtimeEvent::Closed).await;
        assert_eq!(manager.view().connection, ConnectionState::Disconnected);
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_drives_manager_task() {
        let factory = FakeFactory::new();
        let store = MemoryStore::default();
        let (handle, task) = manager(&factory, &store, TurnMode::Automatic).spawn();
        let mut view = handle.subscribe();

        handle.start().await.unwrap();
        factory
            .latest_sender()
            .send(RealtimeEvent::ItemsChanged(hello_exchange()))
            .await
            .unwrap();

        let updated = tokio::time::timeout(
            Duration::from_secs(1),
            view.wait_for(|v| v.live_items.len() == 2),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(updated.live_items[0].text, "Hello");
        assert_eq!(updated.live_items[1].text, "Hi there");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.start().await.unwrap_err(), SessionError::ManagerClosed);
        assert_eq!(factory.mic_holders.load(Ordering::SeqCst), 0);
    }
}
