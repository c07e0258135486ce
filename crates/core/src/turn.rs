//! Turn-Taking Controller
//!
//! One state machine for both push-to-talk and voice-activity-detected turns.
//! Every interruption runs audio truncation first and response cancellation
//! second: the cancellation carries the exact sample offset at which playback
//! stopped.

use crate::{
    error::SessionError,
    generic_types::{SessionConfig, TrackOffset, TurnMode},
    realtime_api::{AudioFrame, AudioTransport, FrameSink, RealtimeClient},
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    ManualRecording,
    AutoListening,
}

#[derive(Debug, Clone)]
pub struct TurnController {
    mode: TurnMode,
    state: TurnState,
}

impl TurnController {
    pub fn new(mode: TurnMode) -> Self {
        Self {
            mode,
            state: TurnState::Idle,
        }
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Returns to `Idle` without touching any device; used when a session
    /// ends or a new one becomes live.
    pub fn reset(&mut self) {
        self.state = TurnState::Idle;
    }

    /// Changes the mode while no session is live.
    pub fn set_mode(&mut self, mode: TurnMode) {
        self.mode = mode;
        self.state = TurnState::Idle;
    }

    /// Called once a session is live. In automatic mode capture starts
    /// immediately and runs until the session ends.
    pub async fn begin_session(
        &mut self,
        audio: &mut dyn AudioTransport,
        frames: &FrameSink,
    ) -> Result<(), SessionError> {
        self.state = TurnState::Idle;
        if self.mode == TurnMode::Automatic {
            audio.record(frames.clone()).await?;
            self.state = TurnState::AutoListening;
        }
        Ok(())
    }

    /// Push-to-talk pressed: cut off the assistant, then start streaming.
    pub async fn press(
        &mut self,
        audio: &mut dyn AudioTransport,
        client: &mut dyn RealtimeClient,
        frames: &FrameSink,
    ) -> Result<(), SessionError> {
        if self.mode != TurnMode::Manual {
            return Err(SessionError::InvalidTurn(
                "push-to-talk requires manual turn detection".into(),
            ));
        }
        if self.state == TurnState::ManualRecording {
            debug!("Push-to-talk already recording");
            return Ok(());
        }
        interrupt_and_cancel(audio, client).await?;
        audio.record(frames.clone()).await?;
        self.state = TurnState::ManualRecording;
        Ok(())
    }

    /// Push-to-talk released: stop streaming and ask for a response to what
    /// was captured.
    ///
    /// Frames still waiting in `pending` were captured before the pause and
    /// are sent ahead of the response request.
    pub async fn release(
        &mut self,
        audio: &mut dyn AudioTransport,
        client: &mut dyn RealtimeClient,
        pending: &mut mpsc::Receiver<AudioFrame>,
    ) -> Result<(), SessionError> {
        if self.state != TurnState::ManualRecording {
            debug!(state = ?self.state, "Release ignored, not recording");
            return Ok(());
        }
        audio.pause_capture().await?;
        let mut flushed = 0;
        while let Ok(frame) = pending.try_recv() {
            client.append_input_audio(&frame).await?;
            flushed += 1;
        }
        debug!(flushed, "Recording released");
        self.state = TurnState::Idle;
        client.request_response().await
    }

    /// The remote side reported the assistant was cut off by new speech.
    pub async fn on_interrupted(
        &mut self,
        audio: &mut dyn AudioTransport,
        client: &mut dyn RealtimeClient,
    ) -> Result<Option<TrackOffset>, SessionError> {
        interrupt_and_cancel(audio, client).await
    }

    /// Switches mode mid-session: pause capture, reconfigure turn detection,
    /// and resume capture right away when entering automatic mode.
    pub async fn switch_mode(
        &mut self,
        mode: TurnMode,
        config: &SessionConfig,
        audio: &mut dyn AudioTransport,
        client: &mut dyn RealtimeClient,
        frames: &FrameSink,
    ) -> Result<(), SessionError> {
        if self.state != TurnState::Idle {
            audio.pause_capture().await?;
        }
        self.mode = mode;
        self.state = TurnState::Idle;

        let mut config = config.clone();
        config.turn_detection = mode;
        client.update_session(&config).await?;

        if mode == TurnMode::Automatic {
            audio.record(frames.clone()).await?;
            self.state = TurnState::AutoListening;
        }
        info!(?mode, "Turn detection mode switched");
        Ok(())
    }
}

async fn interrupt_and_cancel(
    audio: &mut dyn AudioTransport,
    client: &mut dyn RealtimeClient,
) -> Result<Option<TrackOffset>, SessionError> {
    let Some(offset) = audio.interrupt_playback().await else {
        return Ok(None);
    };
    info!(
        track_id = %offset.track_id,
        sample_offset = offset.sample_offset,
        "Playback interrupted, cancelling response"
    );
    client
        .cancel_response(&offset.track_id, offset.sample_offset)
        .await?;
    Ok(Some(offset))
}
