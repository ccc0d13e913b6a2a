//! Microphone capture, remote speech round-trip and playback for the voice
//! assistant.
//!
//! Stages: `Idle -> Initializing -> Recording -> Processing -> Playing -> Idle`.
//! `cleanup()` returns to `Idle` from anywhere. Every piece of background work
//! remembers the generation it was started under and does nothing once the
//! generation has moved on, so a late completion cannot resurrect state.

use crate::traits::{
    AudioOutput, CaptureHandle, Microphone, PlaybackEvent, PlaybackEvents, PlaybackHandle,
    VoiceBackend,
};
use campuschat_core::api::{AudioBlob, AudioPayload};
use campuschat_core::config::VoiceConfig;
use campuschat_core::types::SessionId;
use campuschat_providers::TransportError;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStage {
    #[default]
    Idle,
    Initializing,
    Recording,
    Processing,
    Playing,
}

impl std::fmt::Display for VoiceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(stage_label(*self))
    }
}

pub fn stage_label(stage: VoiceStage) -> &'static str {
    match stage {
        VoiceStage::Idle => "idle",
        VoiceStage::Initializing => "initializing",
        VoiceStage::Recording => "recording",
        VoiceStage::Processing => "processing",
        VoiceStage::Playing => "playing",
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VoiceView {
    pub stage: VoiceStage,
    pub elapsed_ms: u64,
    /// Fixed-length amplitude bars for the recording visualizer.
    pub waveform: Vec<f32>,
    pub error: Option<String>,
    pub is_open: bool,
}

impl VoiceView {
    pub fn is_recording(&self) -> bool {
        self.stage == VoiceStage::Recording
    }

    pub fn is_processing(&self) -> bool {
        self.stage == VoiceStage::Processing
    }

    pub fn is_playing(&self) -> bool {
        self.stage == VoiceStage::Playing
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("voice assistant is busy ({0})")]
    Busy(VoiceStage),

    #[error("voice assistant is closed")]
    Closed,

    #[error("not recording")]
    NotRecording,

    #[error("microphone unavailable: {0}")]
    Microphone(String),

    #[error("recording failed: {0}")]
    Capture(String),

    #[error("nothing was recorded")]
    NothingRecorded,
}

#[derive(Debug, Clone)]
pub struct VoiceOptions {
    pub waveform_bars: usize,
    pub level_sample_interval: Duration,
    pub max_recording: Duration,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self::from(&VoiceConfig::default())
    }
}

impl From<&VoiceConfig> for VoiceOptions {
    fn from(cfg: &VoiceConfig) -> Self {
        Self {
            waveform_bars: cfg.waveform_bars.max(1),
            level_sample_interval: cfg.level_sample_interval(),
            max_recording: cfg.max_recording(),
        }
    }
}

/// Owns one playback handle and its event listener; both are released
/// exactly once, on drop.
struct PlaybackGuard {
    handle: Option<Box<dyn PlaybackHandle>>,
    listener: Option<JoinHandle<()>>,
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }
}

#[derive(Default)]
struct Inner {
    stage: VoiceStage,
    open: bool,
    generation: u64,
    started_at: Option<Instant>,
    elapsed_ms: u64,
    waveform: Vec<f32>,
    error: Option<String>,
    conversation: Option<SessionId>,

    capture: Option<Box<dyn CaptureHandle>>,
    sampler: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    playback: Option<PlaybackGuard>,
}

/// Resources released by a teardown, dropped outside the lock.
#[derive(Default)]
struct Released {
    capture: Option<Box<dyn CaptureHandle>>,
    sampler: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    playback: Option<PlaybackGuard>,
}

impl Released {
    fn dispose(self) {
        if let Some(token) = self.cancel {
            token.cancel();
        }
        if let Some(task) = self.processing {
            task.abort();
        }
        if let Some(task) = self.sampler {
            task.abort();
        }
        if let Some(capture) = self.capture {
            capture.release();
        }
        drop(self.playback);
    }
}

struct Shared {
    mic: Arc<dyn Microphone>,
    backend: Arc<dyn VoiceBackend>,
    output: Arc<dyn AudioOutput>,
    options: VoiceOptions,
    inner: Mutex<Inner>,
    view: watch::Sender<VoiceView>,
}

/// One voice-assistant surface. Not `Clone`: dropping it tears everything down.
pub struct VoiceSession {
    shared: Arc<Shared>,
}

impl VoiceSession {
    pub fn new(
        mic: Arc<dyn Microphone>,
        backend: Arc<dyn VoiceBackend>,
        output: Arc<dyn AudioOutput>,
        options: VoiceOptions,
    ) -> Self {
        let inner = Inner {
            open: true,
            waveform: vec![0.0; options.waveform_bars],
            ..Default::default()
        };
        let (view, _) = watch::channel(view_of(&inner));
        Self {
            shared: Arc::new(Shared {
                mic,
                backend,
                output,
                options,
                inner: Mutex::new(inner),
                view,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceView> {
        self.shared.view.subscribe()
    }

    pub fn snapshot(&self) -> VoiceView {
        view_of(&self.shared.lock())
    }

    /// Conversation the spoken turns belong to (memory-backed endpoint).
    pub fn set_conversation(&self, session: Option<SessionId>) {
        self.shared.lock().conversation = session;
    }

    pub async fn start_recording(&self) -> Result<(), VoiceError> {
        self.shared.start_recording().await
    }

    pub fn stop_recording(&self) -> Result<(), VoiceError> {
        self.shared.stop_recording()
    }

    /// Stops playback and abandons any outstanding request.
    pub fn stop_playing(&self) {
        log::debug!("voice: stop playing");
        self.shared.cleanup();
    }

    /// Idempotent teardown: back to `Idle` with no live device handles, no
    /// running timers and no outstanding request.
    pub fn cleanup(&self) {
        self.shared.cleanup();
    }

    /// The surface was dismissed. Nothing may play or change state afterwards
    /// until `open` is called again.
    pub fn close(&self) {
        self.shared.lock().open = false;
        self.shared.cleanup();
    }

    pub fn open(&self) {
        self.shared.update(|inner| {
            inner.open = true;
            inner.error = None;
        });
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.view.send_replace(view_of(inner));
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let out = f(&mut inner);
        self.publish(&inner);
        out
    }

    async fn start_recording(self: &Arc<Self>) -> Result<(), VoiceError> {
        let generation = {
            let mut inner = self.lock();
            if !inner.open {
                return Err(VoiceError::Closed);
            }
            if inner.stage != VoiceStage::Idle {
                return Err(VoiceError::Busy(inner.stage));
            }
            inner.generation = inner.generation.wrapping_add(1);
            inner.stage = VoiceStage::Initializing;
            inner.error = None;
            inner.elapsed_ms = 0;
            inner.waveform = vec![0.0; self.options.waveform_bars];
            self.publish(&inner);
            inner.generation
        };

        let opened = self.mic.open().await;

        let mut inner = self.lock();
        if inner.generation != generation || !inner.open {
            drop(inner);
            if let Ok(capture) = opened {
                capture.release();
            }
            log::debug!("voice: microphone acquired after teardown; released");
            return Ok(());
        }

        match opened {
            Err(e) => {
                let msg = format!("{e:#}");
                log::warn!("voice: microphone unavailable: {msg}");
                inner.stage = VoiceStage::Idle;
                inner.error = Some(msg.clone());
                self.publish(&inner);
                Err(VoiceError::Microphone(msg))
            }
            Ok(capture) => {
                inner.capture = Some(capture);
                inner.stage = VoiceStage::Recording;
                inner.started_at = Some(Instant::now());
                let sampler = tokio::spawn(run_sampler(self.clone(), generation));
                if let Some(prev) = inner.sampler.replace(sampler) {
                    prev.abort();
                }
                self.publish(&inner);
                log::info!("voice: recording started");
                Ok(())
            }
        }
    }

    fn stop_recording(self: &Arc<Self>) -> Result<(), VoiceError> {
        let (capture, generation, conversation) = {
            let mut inner = self.lock();
            if inner.stage != VoiceStage::Recording {
                return Err(VoiceError::NotRecording);
            }
            if let Some(sampler) = inner.sampler.take() {
                sampler.abort();
            }
            if let Some(started) = inner.started_at.take() {
                inner.elapsed_ms = millis(started.elapsed());
            }
            inner.stage = VoiceStage::Processing;
            self.publish(&inner);
            (
                inner.capture.take(),
                inner.generation,
                inner.conversation.clone(),
            )
        };

        let Some(capture) = capture else {
            return Err(self.fail_idle(generation, VoiceError::NothingRecorded));
        };

        let payload = match capture.finish() {
            Ok(p) if p.bytes.is_empty() => {
                return Err(self.fail_idle(generation, VoiceError::NothingRecorded));
            }
            Ok(p) => p,
            Err(e) => {
                return Err(self.fail_idle(generation, VoiceError::Capture(format!("{e:#}"))));
            }
        };

        let mut inner = self.lock();
        if inner.generation != generation || !inner.open {
            log::debug!("voice: recording finished after teardown; discarded");
            return Ok(());
        }

        // One token per request, never reused.
        let token = CancellationToken::new();
        if let Some(prev) = inner.cancel.replace(token.clone()) {
            prev.cancel();
        }
        let task = tokio::spawn(process_audio(
            self.clone(),
            payload,
            conversation,
            generation,
            token,
        ));
        if let Some(prev) = inner.processing.replace(task) {
            prev.abort();
        }
        log::info!("voice: recording stopped after {} ms", inner.elapsed_ms);
        Ok(())
    }

    fn fail_idle(&self, generation: u64, err: VoiceError) -> VoiceError {
        log::warn!("voice: {err}");
        self.update(|inner| {
            if inner.generation == generation {
                inner.stage = VoiceStage::Idle;
                inner.error = Some(err.to_string());
            }
        });
        err
    }

    fn cleanup(&self) {
        let released = {
            let mut inner = self.lock();
            inner.generation = inner.generation.wrapping_add(1);
            inner.stage = VoiceStage::Idle;
            inner.started_at = None;
            inner.elapsed_ms = 0;
            inner.error = None;
            inner.waveform = vec![0.0; self.options.waveform_bars];
            let released = Released {
                capture: inner.capture.take(),
                sampler: inner.sampler.take(),
                processing: inner.processing.take(),
                cancel: inner.cancel.take(),
                playback: inner.playback.take(),
            };
            self.publish(&inner);
            released
        };
        released.dispose();
    }

    /// `true` when work started under `generation` may still touch state.
    fn is_live(inner: &Inner, generation: u64) -> bool {
        inner.open && inner.generation == generation
    }

    fn start_playback(self: &Arc<Self>, generation: u64, audio: AudioBlob) {
        // Never overlap two playback handles.
        let previous = {
            let mut inner = self.lock();
            if !Self::is_live(&inner, generation) {
                return;
            }
            inner.playback.take()
        };
        drop(previous);

        let (handle, events) = match self.output.play(&audio) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("voice: playback failed to start: {e:#}");
                self.update(|inner| {
                    if Self::is_live(inner, generation) {
                        inner.stage = VoiceStage::Idle;
                        inner.error = Some(format!("playback failed: {e:#}"));
                    }
                });
                return;
            }
        };

        let mut inner = self.lock();
        if !Self::is_live(&inner, generation) {
            drop(inner);
            drop(PlaybackGuard {
                handle: Some(handle),
                listener: None,
            });
            return;
        }

        let listener = tokio::spawn(listen_playback(self.clone(), generation, events));
        inner.playback = Some(PlaybackGuard {
            handle: Some(handle),
            listener: Some(listener),
        });
        inner.stage = VoiceStage::Playing;
        self.publish(&inner);
    }

    fn finish_playback(&self, generation: u64, error: Option<String>) {
        let guard = {
            let mut inner = self.lock();
            if !Self::is_live(&inner, generation) {
                return;
            }
            inner.stage = VoiceStage::Idle;
            inner.error = error;
            self.publish(&inner);
            inner.playback.take()
        };
        if let Some(mut guard) = guard {
            // Called from the listener itself; detach instead of aborting it.
            guard.listener = None;
            drop(guard);
        }
    }
}

async fn run_sampler(shared: Arc<Shared>, generation: u64) {
    let mut ticker = tokio::time::interval(shared.options.level_sample_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let reached_limit = {
            let mut inner = shared.lock();
            if inner.generation != generation || inner.stage != VoiceStage::Recording {
                return;
            }
            let bars = shared.options.waveform_bars;
            let levels = inner
                .capture
                .as_mut()
                .map(|c| c.levels(bars))
                .unwrap_or_default();
            inner.waveform = fit_bars(levels, bars);
            let elapsed = inner.started_at.map(|t| t.elapsed()).unwrap_or_default();
            inner.elapsed_ms = millis(elapsed);
            shared.publish(&inner);
            elapsed >= shared.options.max_recording
        };

        if reached_limit {
            log::info!("voice: max recording duration reached; stopping");
            if let Err(e) = shared.stop_recording() {
                log::debug!("voice: auto-stop skipped: {e}");
            }
            return;
        }
    }
}

async fn process_audio(
    shared: Arc<Shared>,
    payload: AudioPayload,
    conversation: Option<SessionId>,
    generation: u64,
    token: CancellationToken,
) {
    let result = tokio::select! {
        _ = token.cancelled() => {
            log::debug!("voice: request cancelled");
            return;
        }
        r = shared.backend.respond(payload, conversation) => r,
    };

    let audio = {
        let mut inner = shared.lock();
        if !Shared::is_live(&inner, generation) || token.is_cancelled() {
            log::debug!("voice: discarding response for a closed session");
            return;
        }
        inner.cancel = None;
        inner.processing = None;

        match result {
            Ok(audio) => audio,
            Err(TransportError::Cancelled) => {
                inner.stage = VoiceStage::Idle;
                shared.publish(&inner);
                return;
            }
            Err(e) => {
                log::error!("voice: speech request failed: {e}");
                inner.stage = VoiceStage::Idle;
                inner.error = Some(e.to_string());
                shared.publish(&inner);
                return;
            }
        }
    };

    shared.start_playback(generation, audio);
}

async fn listen_playback(shared: Arc<Shared>, generation: u64, mut events: PlaybackEvents) {
    while let Some(event) = events.recv().await {
        match event {
            PlaybackEvent::Started => log::debug!("voice: playback started"),
            PlaybackEvent::Ended => {
                shared.finish_playback(generation, None);
                return;
            }
            PlaybackEvent::Errored(msg) => {
                log::warn!("voice: playback error: {msg}");
                shared.finish_playback(generation, Some(msg));
                return;
            }
        }
    }
    // Sender gone without an end event: treat as finished.
    shared.finish_playback(generation, None);
}

fn view_of(inner: &Inner) -> VoiceView {
    let elapsed_ms = match (inner.stage, inner.started_at) {
        (VoiceStage::Recording, Some(started)) => millis(started.elapsed()),
        _ => inner.elapsed_ms,
    };
    VoiceView {
        stage: inner.stage,
        elapsed_ms,
        waveform: inner.waveform.clone(),
        error: inner.error.clone(),
        is_open: inner.open,
    }
}

fn fit_bars(mut levels: Vec<f32>, bars: usize) -> Vec<f32> {
    levels.resize(bars, 0.0);
    for v in &mut levels {
        *v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    }
    levels
}

fn millis(d: Duration) -> u64 {
    d.as_millis().try_into().unwrap_or(u64::MAX)
}
