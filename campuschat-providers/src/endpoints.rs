//! Request builders for the assistant backend's REST surface.

use crate::error::TransportError;
use crate::multipart::MultipartForm;
use crate::request::HttpRequest;
use campuschat_core::api::{
    AudioPayload, ChatRequest, LoginRequest, NewConversationRequest, TextToSpeechRequest,
};
use campuschat_core::types::SessionId;
use url::Url;

// WAV plays back without a decoder; anything else is still accepted.
const AUDIO_ACCEPT: &str = "audio/wav, audio/*;q=0.8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| TransportError::InvalidRequest(format!("invalid base url: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(TransportError::InvalidRequest(format!(
                "base url must be http(s): {base_url}"
            )));
        }
        Ok(Self { base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Appends percent-encoded path segments to the base url.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    pub fn login(&self, req: &LoginRequest) -> HttpRequest {
        HttpRequest::post_json(self.url(&["api", "login"]), req)
    }

    /// Non-streamed chat. Session fields are only sent to the memory variant.
    pub fn chat(&self, req: &ChatRequest, memory: bool, token: Option<&str>) -> HttpRequest {
        let (segments, body) = chat_route(req, memory, false);
        HttpRequest::post_json(self.url(segments), &body).with_bearer(token)
    }

    pub fn chat_stream(&self, req: &ChatRequest, memory: bool, token: Option<&str>) -> HttpRequest {
        let (segments, body) = chat_route(req, memory, true);
        HttpRequest::post_json(self.url(segments), &body)
            .with_header("Accept", "text/event-stream")
            .with_bearer(token)
    }

    pub fn chat_history(&self, limit: u32, token: Option<&str>) -> HttpRequest {
        let mut url = self.url(&["api", "chat", "history"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        HttpRequest::get(url).with_bearer(token)
    }

    pub fn clear_chat_history(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::delete(self.url(&["api", "chat", "history"])).with_bearer(token)
    }

    pub fn conversations(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "conversations"])).with_bearer(token)
    }

    pub fn conversation(&self, id: &SessionId, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "conversations", id.as_str()])).with_bearer(token)
    }

    pub fn create_conversation(
        &self,
        req: &NewConversationRequest,
        token: Option<&str>,
    ) -> HttpRequest {
        HttpRequest::post_json(self.url(&["api", "conversations"]), req).with_bearer(token)
    }

    pub fn delete_conversation(&self, id: &SessionId, token: Option<&str>) -> HttpRequest {
        HttpRequest::delete(self.url(&["api", "conversations", id.as_str()])).with_bearer(token)
    }

    pub fn my_conversations(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "my-conversations"])).with_bearer(token)
    }

    pub fn delete_my_conversations(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::delete(self.url(&["api", "my-conversations"])).with_bearer(token)
    }

    pub fn upload(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
        token: Option<&str>,
    ) -> HttpRequest {
        MultipartForm::new()
            .file("file", filename, mime_type, bytes)
            .attach(HttpRequest::new("POST", self.url(&["api", "upload"])))
            .with_bearer(token)
    }

    pub fn upload_progress(&self, upload_id: &str, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "upload", "progress", upload_id])).with_bearer(token)
    }

    pub fn upload_sessions(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "upload", "sessions"])).with_bearer(token)
    }

    pub fn documents(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "documents"])).with_bearer(token)
    }

    pub fn document(&self, id: &str, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "documents", id])).with_bearer(token)
    }

    pub fn delete_document(&self, id: &str, token: Option<&str>) -> HttpRequest {
        HttpRequest::delete(self.url(&["api", "documents", id])).with_bearer(token)
    }

    pub fn stats(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "stats"])).with_bearer(token)
    }

    pub fn health(&self) -> HttpRequest {
        HttpRequest::get(self.url(&["health"]))
    }

    /// Recorded audio in, synthesized answer audio out.
    pub fn speech_to_speech(
        &self,
        audio: &AudioPayload,
        session_id: Option<&SessionId>,
        memory: bool,
        token: Option<&str>,
    ) -> HttpRequest {
        let segments: &[&str] = if memory {
            &["api", "speech-to-speech", "memory"]
        } else {
            &["api", "speech-to-speech"]
        };
        let mut form = MultipartForm::new().file(
            "audio",
            &audio.filename,
            &audio.mime_type,
            &audio.bytes,
        );
        if memory {
            if let Some(id) = session_id.filter(|id| !id.as_str().trim().is_empty()) {
                form = form.text("session_id", id.as_str());
            }
        }
        form.attach(HttpRequest::new("POST", self.url(segments)))
            .with_header("Accept", AUDIO_ACCEPT)
            .with_bearer(token)
    }

    pub fn text_to_speech(&self, req: &TextToSpeechRequest, token: Option<&str>) -> HttpRequest {
        HttpRequest::post_json(self.url(&["api", "text-to-speech"]), req)
            .with_header("Accept", AUDIO_ACCEPT)
            .with_bearer(token)
    }

    pub fn voices(&self, token: Option<&str>) -> HttpRequest {
        HttpRequest::get(self.url(&["api", "speech", "voices"])).with_bearer(token)
    }
}

fn chat_route(req: &ChatRequest, memory: bool, stream: bool) -> (&'static [&'static str], ChatRequest) {
    let segments: &'static [&'static str] = match (memory, stream) {
        (false, false) => &["api", "chat"],
        (false, true) => &["api", "chat", "stream"],
        (true, false) => &["api", "chat", "memory"],
        (true, true) => &["api", "chat", "memory", "stream"],
    };
    let body = if memory {
        req.clone()
    } else {
        ChatRequest::new(req.message.clone())
    };
    (segments, body)
}
