//! cpal-backed microphone capture and speaker playback.
//!
//! cpal streams are not `Send`, so each direction runs on its own OS thread
//! that owns its stream for as long as the session holds the device. The
//! transport itself only keeps shared state and the thread handles.

use super::playback::{OutputRenderer, PlaybackQueue};
use crate::audio_utils::{convert_f32_to_i16, create_resampler, downmix_to_mono};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parley_core::{
    error::SessionError,
    generic_types::{REALTIME_SAMPLE_RATE, TrackOffset},
    realtime_api::{AudioTransport, FrameSink},
};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use rubato::Resampler;
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Captured audio is drained and resampled in chunks of this length.
const CAPTURE_CHUNK_MS: u32 = 10;
const CAPTURE_BUFFER_SECONDS: usize = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A thread keeping a cpal stream alive until `running` is cleared.
struct DeviceThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DeviceThread {
    /// Signals the thread and waits on the blocking pool for it to drop its
    /// stream.
    async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle;
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("Audio device thread panicked"),
            Err(e) => error!("Failed to join audio device thread: {}", e),
        }
    }

    /// Signals the thread without waiting; it exits on its next poll.
    fn detach(self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CpalAudioTransport {
    sink: Arc<Mutex<Option<FrameSink>>>,
    queue: Arc<Mutex<PlaybackQueue>>,
    capture: Option<DeviceThread>,
    output: Option<DeviceThread>,
}

impl CpalAudioTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioTransport for CpalAudioTransport {
    async fn begin_capture(&mut self) -> Result<(), SessionError> {
        if self.capture.is_some() {
            return Ok(());
        }
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let sink = self.sink.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("parley-capture".into())
            .spawn(move || run_capture(sink, flag, ready_tx))
            .map_err(|e| SessionError::Microphone(e.to_string()))?;

        let thread = DeviceThread { running, handle };
        match ready_rx.await {
            Ok(Ok(())) => {
                self.capture = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                thread.shutdown().await;
                Err(SessionError::Microphone(e))
            }
            Err(_) => {
                thread.shutdown().await;
                Err(SessionError::Microphone("capture thread exited".into()))
            }
        }
    }

    async fn record(&mut self, sink: FrameSink) -> Result<(), SessionError> {
        if self.capture.is_none() {
            return Err(SessionError::Microphone("capture has not begun".into()));
        }
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    async fn pause_capture(&mut self) -> Result<(), SessionError> {
        lock(&self.sink).take();
        Ok(())
    }

    async fn end_capture(&mut self) -> Result<(), SessionError> {
        lock(&self.sink).take();
        if let Some(thread) = self.capture.take() {
            thread.shutdown().await;
            info!("Microphone released");
        }
        Ok(())
    }

    async fn connect_playback(&mut self) -> Result<(), SessionError> {
        if self.output.is_some() {
            return Ok(());
        }
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let queue = self.queue.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("parley-playback".into())
            .spawn(move || run_output(queue, flag, ready_tx))
            .map_err(|e| SessionError::Playback(e.to_string()))?;

        let thread = DeviceThread { running, handle };
        match ready_rx.await {
            Ok(Ok(())) => {
                self.output = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                thread.shutdown().await;
                Err(SessionError::Playback(e))
            }
            Err(_) => {
                thread.shutdown().await;
                Err(SessionError::Playback("playback thread exited".into()))
            }
        }
    }

    fn enqueue_playback(&mut self, pcm: &[i16], track_id: &str) {
        lock(&self.queue).enqueue(track_id, pcm);
    }

    async fn interrupt_playback(&mut self) -> Option<TrackOffset> {
        lock(&self.queue).interrupt()
    }
}

impl Drop for CpalAudioTransport {
    fn drop(&mut self) {
        if let Some(thread) = self.capture.take() {
            thread.detach();
        }
        if let Some(thread) = self.output.take() {
            thread.detach();
        }
    }
}

type Ready = oneshot::Sender<Result<(), String>>;

fn run_capture(sink: Arc<Mutex<Option<FrameSink>>>, running: Arc<AtomicBool>, ready: Ready) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err("no default input device".into()));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(format!("no default input config: {e}")));
            return;
        }
    };
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let native_rate = config.sample_rate.0;

    let chunk = (native_rate * CAPTURE_CHUNK_MS / 1000) as usize;
    let ring = HeapRb::<f32>::new(native_rate as usize * CAPTURE_BUFFER_SECONDS);
    let (mut producer, mut consumer) = ring.split();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = downmix_to_mono(data, channels);
            let pushed = producer.push_slice(&mono);
            if pushed < mono.len() {
                debug!("Capture buffer full, dropping {} samples", mono.len() - pushed);
            }
        },
        |err| error!("Audio input stream error: {}", err),
        None,
    );
    let stream = match stream.map_err(|e| e.to_string()).and_then(|stream| {
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to start input stream: {e}")));
            return;
        }
    };

    let mut resampler = if native_rate != REALTIME_SAMPLE_RATE {
        match create_resampler(native_rate as f64, REALTIME_SAMPLE_RATE as f64, chunk) {
            Ok(resampler) => Some(resampler),
            Err(e) => {
                let _ = ready.send(Err(format!("failed to create resampler: {e}")));
                return;
            }
        }
    } else {
        None
    };

    info!(native_rate, channels, "Microphone acquired");
    let _ = ready.send(Ok(()));

    let mut buffer = vec![0.0f32; chunk];
    while running.load(Ordering::SeqCst) {
        if consumer.occupied_len() < chunk {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        consumer.pop_slice(&mut buffer);

        let samples = match resampler.as_mut() {
            Some(resampler) => match resampler.process(&[&buffer[..]], None) {
                Ok(mut out) => out.pop().unwrap_or_default(),
                Err(e) => {
                    warn!("Resampling failed: {}", e);
                    continue;
                }
            },
            None => buffer.clone(),
        };

        // Frames are only delivered while recording.
        if let Some(sink) = lock(&sink).as_ref() {
            if sink.try_send(convert_f32_to_i16(&samples)).is_err() {
                debug!("Frame channel full, dropping captured audio");
            }
        }
    }
    drop(stream);
}

fn run_output(queue: Arc<Mutex<PlaybackQueue>>, running: Arc<AtomicBool>, ready: Ready) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no default output device".into()));
        return;
    };
    let supported = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(format!("no default output config: {e}")));
            return;
        }
    };
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;

    let mut renderer = OutputRenderer::new(REALTIME_SAMPLE_RATE, device_rate);
    let mut mono = Vec::new();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            mono.resize(frames, 0.0);
            renderer.render(&mut lock(&queue), &mut mono);
            for (frame, sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                frame.fill(*sample);
            }
        },
        |err| error!("Audio output stream error: {}", err),
        None,
    );
    let stream = match stream.map_err(|e| e.to_string()).and_then(|stream| {
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to start output stream: {e}")));
            return;
        }
    };

    info!(device_rate, channels, "Audio output connected");
    let _ = ready.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL * 4);
    }
    drop(stream);
}
