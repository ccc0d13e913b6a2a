use crate::error::TransportError;
use crate::runtime::HttpResponse;
use campuschat_core::api::{
    AudioBlob, ChatReply, ConversationDetail, ConversationList, ConversationSummary,
    DocumentInfo, DocumentList, Health, HistoryResponse, LoginResponse, Stats, UploadAccepted,
    UploadProgress, UploadSession, UploadSessionList, Voice, VoiceList,
};
use campuschat_core::types::Message;
use serde::de::DeserializeOwned;

/// Human-readable error text from an error body.
///
/// Understands FastAPI's `{"detail": "..."}` and `{"detail": [{"msg": ..}]}`,
/// plus `{"error"|"message": "..."}`; otherwise falls back to the raw body.
pub fn error_detail(body: &[u8]) -> String {
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(body) {
        let field = v
            .get("detail")
            .or_else(|| v.get("error"))
            .or_else(|| v.get("message"));
        match field {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(serde_json::Value::Array(items)) => {
                let msgs: Vec<String> = items
                    .iter()
                    .filter_map(|i| i.get("msg").and_then(|m| m.as_str()))
                    .map(str::to_string)
                    .collect();
                if !msgs.is_empty() {
                    return msgs.join("; ");
                }
            }
            Some(other) => return other.to_string(),
            None => {}
        }
    }

    let raw = String::from_utf8_lossy(body).trim().to_string();
    if raw.is_empty() {
        "empty response body".into()
    } else {
        campuschat_core::text::preview_text(&raw)
    }
}

pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
}

fn parse_ok<T: DeserializeOwned>(resp: HttpResponse) -> Result<T, TransportError> {
    let resp = resp.ensure_success()?;
    parse_json(&resp.body)
}

pub fn parse_login(resp: HttpResponse) -> Result<LoginResponse, TransportError> {
    let login: LoginResponse = parse_ok(resp)?;
    if login.access_token.trim().is_empty() {
        return Err(TransportError::Decode("login response without access_token".into()));
    }
    Ok(login)
}

pub fn parse_chat_reply(resp: HttpResponse) -> Result<ChatReply, TransportError> {
    parse_ok(resp)
}

pub fn parse_history(resp: HttpResponse) -> Result<Vec<Message>, TransportError> {
    let history: HistoryResponse = parse_ok(resp)?;
    Ok(history.into_messages())
}

pub fn parse_conversations(resp: HttpResponse) -> Result<Vec<ConversationSummary>, TransportError> {
    let list: ConversationList = parse_ok(resp)?;
    Ok(list.into_vec())
}

pub fn parse_conversation_summary(resp: HttpResponse) -> Result<ConversationSummary, TransportError> {
    parse_ok(resp)
}

pub fn parse_conversation_messages(resp: HttpResponse) -> Result<Vec<Message>, TransportError> {
    let detail: ConversationDetail = parse_ok(resp)?;
    Ok(detail
        .messages
        .into_iter()
        .flat_map(|m| m.into_messages())
        .collect())
}

pub fn parse_documents(resp: HttpResponse) -> Result<Vec<DocumentInfo>, TransportError> {
    let list: DocumentList = parse_ok(resp)?;
    Ok(list.into_vec())
}

pub fn parse_document(resp: HttpResponse) -> Result<DocumentInfo, TransportError> {
    parse_ok(resp)
}

pub fn parse_upload_accepted(resp: HttpResponse) -> Result<UploadAccepted, TransportError> {
    parse_ok(resp)
}

pub fn parse_upload_progress(resp: HttpResponse) -> Result<UploadProgress, TransportError> {
    parse_ok(resp)
}

pub fn parse_upload_sessions(resp: HttpResponse) -> Result<Vec<UploadSession>, TransportError> {
    let list: UploadSessionList = parse_ok(resp)?;
    Ok(list.into_vec())
}

pub fn parse_stats(resp: HttpResponse) -> Result<Stats, TransportError> {
    parse_ok(resp)
}

pub fn parse_health(resp: HttpResponse) -> Result<Health, TransportError> {
    parse_ok(resp)
}

pub fn parse_voices(resp: HttpResponse) -> Result<Vec<Voice>, TransportError> {
    let list: VoiceList = parse_ok(resp)?;
    Ok(list.into_vec())
}

/// Speech endpoints answer with raw audio bytes.
pub fn parse_audio(resp: HttpResponse) -> Result<AudioBlob, TransportError> {
    let resp = resp.ensure_success()?;
    if resp.body.is_empty() {
        return Err(TransportError::Decode("empty audio response".into()));
    }
    let mime_type = resp
        .content_type
        .clone()
        .unwrap_or_else(|| "audio/mpeg".into());
    if mime_type.starts_with("application/json") {
        return Err(TransportError::Decode(format!(
            "expected audio, got JSON: {}",
            error_detail(&resp.body)
        )));
    }
    Ok(AudioBlob {
        mime_type,
        bytes: resp.body,
    })
}

/// For endpoints whose success body carries nothing we need (DELETE, etc.).
pub fn parse_empty(resp: HttpResponse) -> Result<(), TransportError> {
    resp.ensure_success().map(|_| ())
}
