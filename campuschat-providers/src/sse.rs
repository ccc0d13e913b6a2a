//! Incremental decoder for the chat response stream.
//!
//! The backend frames each event as one line, either SSE style (`data: {...}`)
//! or bare JSON. Bytes are buffered until a full line is available, so chunk
//! boundaries (mid-line, mid-escape, mid-codepoint) never change the output.
//!
//! Known server quirks handled here:
//! - a `content` field that is itself a serialized `{type, content}` envelope;
//! - a `full_response` that embeds several concatenated `"full_response"`
//!   fields, where the last one is authoritative;
//! - completion information emitted more than once per turn.

use campuschat_core::events::{StreamEvent, WireEvent};
use campuschat_core::text::{
    contains_full_response_field, count_full_response_fields, extract_content_field,
    extract_last_full_response, looks_like_envelope, preview_text,
};
use campuschat_core::types::SessionInfo;

#[derive(Debug, Default)]
pub struct StreamDecoder {
    carry: Vec<u8>,
    accumulated: String,
    last_full_response: Option<String>,
    last_session: Option<SessionInfo>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes every complete line in `chunk` (plus earlier carry-over).
    /// An unterminated trailing line is kept for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        self.carry.extend_from_slice(chunk);
        while let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            self.decode_line(&line[..line.len() - 1], &mut out);
        }
        out
    }

    /// End of input: flushes the carry-over, then emits one final `Complete`
    /// built from the best text seen so far. Later calls return nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.finished = true;

        let rest = std::mem::take(&mut self.carry);
        self.decode_line(&rest, &mut out);

        let final_text = self.last_full_response.clone().or_else(|| {
            (!self.accumulated.is_empty()).then(|| self.accumulated.clone())
        });
        out.push(StreamEvent::Complete {
            final_text,
            session: self.last_session.clone(),
        });
        out
    }

    /// Concatenation of every delta emitted so far.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    fn decode_line(&mut self, raw: &[u8], out: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }

        let payload = match line.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            None if is_sse_field(line) => return,
            None => line,
        };
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }

        self.decode_payload(payload, 0, out);
    }

    fn decode_payload(&mut self, payload: &str, depth: u8, out: &mut Vec<StreamEvent>) {
        match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(value @ serde_json::Value::Object(_)) => {
                match serde_json::from_value::<WireEvent>(value) {
                    Ok(event) => self.decode_event(event, depth, out),
                    Err(_) => self.salvage(payload, out),
                }
            }
            Ok(serde_json::Value::String(inner)) => {
                if looks_like_envelope(&inner) {
                    if depth == 0 {
                        return self.decode_payload(&inner, depth + 1, out);
                    }
                    log::warn!("dropping nested stream envelope: {}", preview_text(&inner));
                    return;
                }
                out.push(StreamEvent::Unparseable(inner));
            }
            Ok(_) => out.push(StreamEvent::Unparseable(payload.to_string())),
            Err(_) => self.salvage(payload, out),
        }
    }

    fn decode_event(&mut self, event: WireEvent, depth: u8, out: &mut Vec<StreamEvent>) {
        let session = event.session_info();
        match event {
            WireEvent::Content { content, done } => {
                self.push_content(content, depth, out);
                if done {
                    self.push_complete(None, None, out);
                }
            }
            WireEvent::Complete { full_response, .. } => {
                let text = full_response.and_then(resolve_full_response);
                self.push_complete(text, session, out);
            }
            WireEvent::Error { message } => {
                let message = message.unwrap_or_else(|| "server reported an error".into());
                log::warn!("stream error event: {message}");
                out.push(StreamEvent::ServerError(message));
            }
            WireEvent::Unknown => {
                log::debug!("ignoring stream event of unknown type");
            }
        }
    }

    fn push_content(&mut self, content: String, depth: u8, out: &mut Vec<StreamEvent>) {
        if content.is_empty() {
            return;
        }

        if looks_like_envelope(&content) {
            if depth == 0 {
                if let Ok(inner) = serde_json::from_str::<WireEvent>(&content) {
                    return self.decode_event(inner, depth + 1, out);
                }
                if let Some(inner) = extract_content_field(&content) {
                    return self.push_content(inner, depth + 1, out);
                }
            }
            log::warn!("dropping nested stream envelope: {}", preview_text(&content));
            return;
        }

        self.accumulated.push_str(&content);
        out.push(StreamEvent::ContentDelta(content));
    }

    fn push_complete(
        &mut self,
        final_text: Option<String>,
        session: Option<SessionInfo>,
        out: &mut Vec<StreamEvent>,
    ) {
        if let Some(text) = &final_text {
            self.last_full_response = Some(text.clone());
        }
        if let Some(info) = &session {
            self.last_session = Some(info.clone());
        }
        out.push(StreamEvent::Complete {
            final_text,
            session,
        });
    }

    /// Best effort for lines that are not valid JSON (truncated or
    /// concatenated payloads).
    fn salvage(&mut self, payload: &str, out: &mut Vec<StreamEvent>) {
        if contains_full_response_field(payload) {
            let embedded = count_full_response_fields(payload);
            if embedded > 1 {
                log::warn!("malformed stream line embeds {embedded} full_response fields; using the last one");
            }
            let text = extract_last_full_response(payload).filter(|t| !t.is_empty());
            return self.push_complete(text, None, out);
        }

        if let Some(content) = extract_content_field(payload) {
            log::debug!("salvaged content from malformed stream line");
            return self.push_content(content, 1, out);
        }

        log::debug!("unparseable stream line: {}", preview_text(payload));
        out.push(StreamEvent::Unparseable(payload.to_string()));
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn resolve_full_response(full_response: String) -> Option<String> {
    if full_response.trim().is_empty() {
        return None;
    }

    let embedded = count_full_response_fields(&full_response);
    if embedded > 0 {
        log::warn!("full_response embeds {embedded} full_response field(s); using the last one");
        return extract_last_full_response(&full_response).filter(|t| !t.is_empty());
    }

    if looks_like_envelope(&full_response) {
        if let Some(content) = extract_content_field(&full_response) {
            log::warn!("full_response carries a serialized content envelope");
            return Some(content);
        }
    }

    Some(full_response)
}
