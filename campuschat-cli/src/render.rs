//! Terminal rendering helpers.

use campuschat_core::types::{Message, Role};
use campuschat_engine::VoiceStage;

const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Text to print so the terminal catches up with `partial`, given that
/// `printed` is already on screen. `None` when nothing new can be printed.
pub fn stream_delta<'a>(printed: &str, partial: &'a str) -> Option<&'a str> {
    if partial.len() <= printed.len() || !partial.starts_with(printed) {
        return None;
    }
    Some(&partial[printed.len()..])
}

/// What to print once the reply is committed: the unseen tail if the final
/// text extends what was streamed, otherwise the whole text on a fresh line.
pub fn final_tail<'a>(printed: &str, final_text: &'a str) -> (bool, &'a str) {
    if printed.is_empty() {
        return (false, final_text);
    }
    match final_text.strip_prefix(printed) {
        Some(rest) => (false, rest),
        None => (true, final_text),
    }
}

pub fn waveform(bars: &[f32]) -> String {
    bars.iter()
        .map(|b| {
            let idx = (b.clamp(0.0, 1.0) * (BLOCKS.len() - 1) as f32).round() as usize;
            BLOCKS[idx]
        })
        .collect()
}

pub fn elapsed(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn stage_hint(stage: VoiceStage) -> &'static str {
    match stage {
        VoiceStage::Idle => "ready",
        VoiceStage::Initializing => "opening microphone…",
        VoiceStage::Recording => "listening",
        VoiceStage::Processing => "thinking…",
        VoiceStage::Playing => "speaking…",
    }
}

pub fn transcript_line(m: &Message) -> String {
    let who = match m.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    format!("{who}> {}", m.content)
}
