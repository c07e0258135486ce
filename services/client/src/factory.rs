use crate::{
    audio::CpalAudioTransport,
    config::Config,
    realtime::{OpenAIRealtimeClient, RealtimeEndpoint},
};
use parley_core::{
    error::SessionError,
    realtime_api::{SessionFactory, SessionParts},
};
use tokio::sync::mpsc;
use tracing::debug;

const EVENT_BUFFER: usize = 512;

/// Builds an OpenAI realtime client and a cpal audio transport for every
/// live session.
pub struct OpenAISessionFactory {
    endpoint: RealtimeEndpoint,
}

impl OpenAISessionFactory {
    pub fn new(endpoint: RealtimeEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(RealtimeEndpoint {
            url: config.realtime_url.clone(),
            model: config.realtime_model.clone(),
            api_key: config.openai_api_key.clone(),
        })
    }
}

impl SessionFactory for OpenAISessionFactory {
    fn create(&mut self) -> Result<SessionParts, SessionError> {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        debug!(url = %self.endpoint.url, "Creating session resources");
        Ok(SessionParts {
            client: Box::new(OpenAIRealtimeClient::new(self.endpoint.clone(), events_tx)),
            audio: Box::new(CpalAudioTransport::new()),
            events,
        })
    }
}
