use crate::types::{SessionId, SessionInfo};
use serde::{Deserialize, Serialize};

/// One decoded unit of a chat response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    ContentDelta(String),
    Complete {
        final_text: Option<String>,
        session: Option<SessionInfo>,
    },
    Unparseable(String),
    /// The server reported a failure mid-stream (`type: "error"`).
    ServerError(String),
}

impl StreamEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. })
    }
}

/// A stream line as the server frames it, discriminated on its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Content {
        #[serde(default)]
        content: String,
        #[serde(default)]
        done: bool,
    },
    Complete {
        #[serde(default)]
        full_response: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        message_count: Option<u32>,
        #[serde(default)]
        is_new_conversation: Option<bool>,
    },
    Error {
        #[serde(default, alias = "error", alias = "detail")]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl WireEvent {
    /// Session metadata carried by a completion, if the server sent an id.
    pub fn session_info(&self) -> Option<SessionInfo> {
        match self {
            WireEvent::Complete {
                session_id: Some(id),
                message_count,
                is_new_conversation,
                ..
            } if !id.trim().is_empty() => Some(SessionInfo {
                session_id: SessionId::new(id.clone()),
                message_count: message_count.unwrap_or_default(),
                is_new_conversation: is_new_conversation.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}
