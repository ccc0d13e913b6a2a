//! Request and response bodies of the assistant backend's REST surface.
//!
//! Response shapes vary slightly between endpoints (bare lists vs. wrapped
//! objects, `id` vs. `document_id`); those differences are absorbed here so the
//! rest of the workspace sees one type per concept.

use crate::types::{Message, Role, SessionId, SessionInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("email", &self.email)
            .finish()
    }
}

fn default_token_type() -> String {
    "bearer".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_new_conversation: Option<bool>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            start_new_conversation: None,
        }
    }
}

/// Reply of the non-streaming chat endpoints. Session fields are present only
/// on the memory-backed variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub message_count: Option<u32>,
    #[serde(default)]
    pub is_new_conversation: Option<bool>,
}

impl ChatReply {
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session_id
            .as_ref()
            .filter(|id| !id.as_str().trim().is_empty())
            .map(|id| SessionInfo {
                session_id: id.clone(),
                message_count: self.message_count.unwrap_or_default(),
                is_new_conversation: self.is_new_conversation.unwrap_or_default(),
            })
    }
}

/// A stored turn as returned by history endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryItem {
    Message {
        role: Role,
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Exchange {
        #[serde(alias = "user_message")]
        message: String,
        #[serde(alias = "assistant_response", alias = "bot_response")]
        response: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
}

impl HistoryItem {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            HistoryItem::Message { role, content, .. } => vec![Message::with_role(role, content)],
            HistoryItem::Exchange {
                message, response, ..
            } => vec![Message::user(message), Message::assistant(response)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryResponse {
    Wrapped {
        #[serde(alias = "messages")]
        history: Vec<HistoryItem>,
    },
    Bare(Vec<HistoryItem>),
}

impl HistoryResponse {
    pub fn into_messages(self) -> Vec<Message> {
        let items = match self {
            HistoryResponse::Wrapped { history } => history,
            HistoryResponse::Bare(items) => items,
        };
        items.into_iter().flat_map(HistoryItem::into_messages).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "id")]
    pub session_id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, alias = "last_activity")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationList {
    Wrapped {
        #[serde(alias = "sessions")]
        conversations: Vec<ConversationSummary>,
    },
    Bare(Vec<ConversationSummary>),
}

impl ConversationList {
    pub fn into_vec(self) -> Vec<ConversationSummary> {
        match self {
            ConversationList::Wrapped { conversations } => conversations,
            ConversationList::Bare(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(alias = "id")]
    pub session_id: SessionId,
    #[serde(default, alias = "history")]
    pub messages: Vec<HistoryItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewConversationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(alias = "document_id")]
    pub id: String,
    #[serde(alias = "file_name", alias = "name")]
    pub filename: String,
    #[serde(default, alias = "size", alias = "file_size_bytes")]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "chunks", alias = "num_chunks")]
    pub chunk_count: Option<u32>,
    #[serde(default, alias = "created_at")]
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentList {
    Wrapped { documents: Vec<DocumentInfo> },
    Bare(Vec<DocumentInfo>),
}

impl DocumentList {
    pub fn into_vec(self) -> Vec<DocumentInfo> {
        match self {
            DocumentList::Wrapped { documents } => documents,
            DocumentList::Bare(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAccepted {
    #[serde(alias = "session_id", alias = "id")]
    pub upload_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub status: String,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "chunks")]
    pub chunk_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UploadProgress {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "completed" | "complete" | "done" | "success"
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "failed" | "error" | "cancelled"
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_finished() || self.is_failed()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    #[serde(alias = "session_id", alias = "id")]
    pub upload_id: String,
    #[serde(default, alias = "file_name")]
    pub filename: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default, alias = "chunks")]
    pub chunk_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadSessionList {
    Wrapped { sessions: Vec<UploadSession> },
    Bare(Vec<UploadSession>),
}

impl UploadSessionList {
    pub fn into_vec(self) -> Vec<UploadSession> {
        match self {
            UploadSessionList::Wrapped { sessions } => sessions,
            UploadSessionList::Bare(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub total_documents: Option<u64>,
    #[serde(default)]
    pub total_chunks: Option<u64>,
    #[serde(default)]
    pub total_conversations: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "ok" | "healthy" | "up"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    #[serde(alias = "voice_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoiceList {
    Wrapped { voices: Vec<Voice> },
    Bare(Vec<Voice>),
}

impl VoiceList {
    pub fn into_vec(self) -> Vec<Voice> {
        match self {
            VoiceList::Wrapped { voices } => voices,
            VoiceList::Bare(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextToSpeechRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Binary audio returned by the speech endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Recorded audio ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_accepts_wrapped_and_bare_shapes() {
        let wrapped: HistoryResponse = serde_json::from_str(
            r#"{"history":[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.into_messages().len(), 2);

        let bare: HistoryResponse = serde_json::from_str(
            r#"[{"message":"what is the library schedule?","response":"8am-10pm","timestamp":"t"}]"#,
        )
        .unwrap();
        let msgs = bare.into_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].content, "8am-10pm");
    }

    #[test]
    fn chat_request_omits_absent_session_fields() {
        let s = serde_json::to_string(&ChatRequest::new("hi")).unwrap();
        assert_eq!(s, r#"{"message":"hi"}"#);
    }

    #[test]
    fn memory_reply_exposes_session_info() {
        let r: ChatReply = serde_json::from_str(
            r#"{"response":"ok","sources":[],"timestamp":"t","session_id":"s9","message_count":3,"is_new_conversation":false}"#,
        )
        .unwrap();
        let info = r.session_info().unwrap();
        assert_eq!(info.session_id.as_str(), "s9");
        assert_eq!(info.message_count, 3);
    }

    #[test]
    fn document_aliases_are_accepted() {
        let d: DocumentList = serde_json::from_str(
            r#"{"documents":[{"document_id":"d1","file_name":"syllabus.pdf","size":1024,"status":"processed","chunks":12}]}"#,
        )
        .unwrap();
        let docs = d.into_vec();
        assert_eq!(docs[0].id, "d1");
        assert_eq!(docs[0].filename, "syllabus.pdf");
        assert_eq!(docs[0].chunk_count, Some(12));
    }

    #[test]
    fn login_debug_hides_secrets() {
        let req = LoginRequest {
            email: "a@uni.edu".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{req:?}").contains("hunter2"));

        let resp = LoginResponse {
            access_token: "tok-123".into(),
            token_type: "bearer".into(),
            expires_in: Some(3600),
            email: None,
        };
        assert!(!format!("{resp:?}").contains("tok-123"));
    }

    #[test]
    fn upload_progress_terminal_states() {
        let p = UploadProgress {
            status: "Completed".into(),
            progress: 100.0,
            message: None,
            chunk_count: Some(4),
            error: None,
        };
        assert!(p.is_finished());
        assert!(p.is_terminal());
    }
}
