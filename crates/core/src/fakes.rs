//! Recording fakes of the session collaborators, shared by unit tests.

use crate::{
    error::{HistoryError, SessionError},
    generic_types::{RealtimeEvent, SessionConfig, TrackOffset, TurnMode},
    history::{HistoryStore, PersistedHistory},
    item::ConversationItem,
    realtime_api::{AudioTransport, FrameSink, RealtimeClient, SessionFactory, SessionParts},
};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    UpdateSession(TurnMode),
    SendText(String),
    AppendAudio(usize),
    RequestResponse,
    CancelResponse(String, u64),
    BeginCapture,
    Record,
    PauseCapture,
    EndCapture,
    ConnectPlayback,
    Enqueue(String),
    Interrupt,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub struct FakeClient {
    pub log: CallLog,
    pub fail_connect: bool,
    pub fail_update: bool,
    pub items: Vec<ConversationItem>,
}

#[async_trait]
impl RealtimeClient for FakeClient {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::Connect);
        if self.fail_connect {
            return Err(SessionError::Connection("refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::Disconnect);
        Ok(())
    }

    async fn update_session(&mut self, config: &SessionConfig) -> Result<(), SessionError> {
        self.log
            .lock()
            .unwrap()
            .push(Call::UpdateSession(config.turn_detection));
        if self.fail_update {
            return Err(SessionError::Transport("session.update rejected".into()));
        }
        Ok(())
    }

    async fn send_user_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::SendText(text.to_string()));
        Ok(())
    }

    async fn append_input_audio(&mut self, frame: &[i16]) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::AppendAudio(frame.len()));
        Ok(())
    }

    async fn request_response(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::RequestResponse);
        Ok(())
    }

    async fn cancel_response(
        &mut self,
        track_id: &str,
        sample_offset: u64,
    ) -> Result<(), SessionError> {
        self.log
            .lock()
            .unwrap()
            .push(Call::CancelResponse(track_id.to_string(), sample_offset));
        Ok(())
    }

    fn items(&self) -> Vec<ConversationItem> {
        self.items.clone()
    }
}

pub struct FakeAudio {
    pub log: CallLog,
    pub fail_begin: bool,
    pub interrupt_result: Arc<Mutex<Option<TrackOffset>>>,
    pub mic_holders: Arc<AtomicUsize>,
    pub sink: Option<FrameSink>,
}

#[async_trait]
impl AudioTransport for FakeAudio {
    async fn begin_capture(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::BeginCapture);
        if self.fail_begin {
            return Err(SessionError::Microphone("permission denied".into()));
        }
        let holders = self.mic_holders.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(holders, 1, "two sessions held the microphone");
        Ok(())
    }

    async fn record(&mut self, sink: FrameSink) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::Record);
        self.sink = Some(sink);
        Ok(())
    }

    async fn pause_capture(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::PauseCapture);
        self.sink = None;
        Ok(())
    }

    async fn end_capture(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::EndCapture);
        self.sink = None;
        self.mic_holders.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect_playback(&mut self) -> Result<(), SessionError> {
        self.log.lock().unwrap().push(Call::ConnectPlayback);
        Ok(())
    }

    fn enqueue_playback(&mut self, _pcm: &[i16], track_id: &str) {
        self.log
            .lock()
            .unwrap()
            .push(Call::Enqueue(track_id.to_string()));
    }

    async fn interrupt_playback(&mut self) -> Option<TrackOffset> {
        self.log.lock().unwrap().push(Call::Interrupt);
        self.interrupt_result.lock().unwrap().take()
    }
}

pub fn fake_pair(log: &CallLog) -> (FakeClient, FakeAudio) {
    (
        FakeClient {
            log: log.clone(),
            fail_connect: false,
            fail_update: false,
            items: Vec::new(),
        },
        FakeAudio {
            log: log.clone(),
            fail_begin: false,
            interrupt_result: Arc::new(Mutex::new(None)),
            mic_holders: Arc::new(AtomicUsize::new(0)),
            sink: None,
        },
    )
}

/// Hands out fakes sharing one call log; keeps the event sender of each
/// session so tests can inject remote events.
#[derive(Clone)]
pub struct FakeFactory {
    pub log: CallLog,
    pub fail_connect: Arc<Mutex<bool>>,
    pub fail_update: Arc<Mutex<bool>>,
    pub fail_begin: Arc<Mutex<bool>>,
    pub interrupt_result: Arc<Mutex<Option<TrackOffset>>>,
    pub mic_holders: Arc<AtomicUsize>,
    pub senders: Arc<Mutex<Vec<mpsc::Sender<RealtimeEvent>>>>,
    pub created: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_connect: Arc::new(Mutex::new(false)),
            fail_update: Arc::new(Mutex::new(false)),
            fail_begin: Arc::new(Mutex::new(false)),
            interrupt_result: Arc::new(Mutex::new(None)),
            mic_holders: Arc::new(AtomicUsize::new(0)),
            senders: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn latest_sender(&self) -> mpsc::Sender<RealtimeEvent> {
        self.senders.lock().unwrap().last().cloned().unwrap()
    }
}

impl SessionFactory for FakeFactory {
    fn create(&mut self) -> Result<SessionParts, SessionError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(tx);
        let client = FakeClient {
            log: self.log.clone(),
            fail_connect: *self.fail_connect.lock().unwrap(),
            fail_update: *self.fail_update.lock().unwrap(),
            items: Vec::new(),
        };
        let audio = FakeAudio {
            log: self.log.clone(),
            fail_begin: *self.fail_begin.lock().unwrap(),
            interrupt_result: self.interrupt_result.clone(),
            mic_holders: self.mic_holders.clone(),
            sink: None,
        };
        Ok(SessionParts {
            client: Box::new(client),
            audio: Box::new(audio),
            events: rx,
        })
    }
}

/// In-memory history keeping every snapshot written.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub initial: PersistedHistory,
    pub saved: Arc<Mutex<Vec<PersistedHistory>>>,
}

impl MemoryStore {
    pub fn with_history(initial: PersistedHistory) -> Self {
        Self {
            initial,
            saved: Arc::default(),
        }
    }

    pub fn writes(&self) -> Vec<PersistedHistory> {
        self.saved.lock().unwrap().clone()
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<PersistedHistory, HistoryError> {
        Ok(self.initial.clone())
    }

    fn save(&self, history: &PersistedHistory) -> Result<(), HistoryError> {
        self.saved.lock().unwrap().push(history.clone());
        Ok(())
    }
}
