use async_trait::async_trait;
use campuschat_core::api::{AudioBlob, AudioPayload, ChatReply, ChatRequest};
use campuschat_core::types::{Message, SessionId};
use campuschat_providers::{ByteStream, TransportError};
use tokio::sync::mpsc;

/// Chat endpoints the accumulator talks to.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Opens the streamed reply. An error here happened before any byte was
    /// read and is a hard failure, not an empty stream.
    async fn open_chat_stream(&self, req: &ChatRequest) -> Result<ByteStream, TransportError>;

    async fn send_chat(&self, req: &ChatRequest) -> Result<ChatReply, TransportError>;

    async fn load_history(&self, session: &SessionId) -> Result<Vec<Message>, TransportError>;
}

/// Remote speech-to-speech pipeline: recorded question in, spoken answer out.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn respond(
        &self,
        audio: AudioPayload,
        session: Option<SessionId>,
    ) -> Result<AudioBlob, TransportError>;
}

#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquires the input device and starts capturing.
    async fn open(&self) -> anyhow::Result<Box<dyn CaptureHandle>>;
}

/// A live capture. Consumed by `finish` or `release`; dropping it must also
/// release the device.
pub trait CaptureHandle: Send {
    /// Amplitude bars in `0.0..=1.0` for the most recent audio window.
    fn levels(&mut self, bars: usize) -> Vec<f32>;

    fn finish(self: Box<Self>) -> anyhow::Result<AudioPayload>;

    fn release(self: Box<Self>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Errored(String),
}

pub trait PlaybackHandle: Send {
    /// Stops output and frees the device. Must tolerate repeated calls.
    fn stop(&mut self);
}

pub type PlaybackEvents = mpsc::UnboundedReceiver<PlaybackEvent>;

pub trait AudioOutput: Send + Sync {
    fn play(&self, audio: &AudioBlob) -> anyhow::Result<(Box<dyn PlaybackHandle>, PlaybackEvents)>;
}
