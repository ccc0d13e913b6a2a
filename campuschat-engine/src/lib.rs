pub mod accumulator;
pub mod traits;
pub mod voice;

pub use accumulator::{ChatError, ChatOptions, ChatPhase, ChatSession, ChatView, SendOutcome};
pub use voice::{VoiceError, VoiceOptions, VoiceSession, VoiceStage, VoiceView};
