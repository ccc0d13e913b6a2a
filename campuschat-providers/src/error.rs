use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server rejected the bearer token (HTTP 401).
    #[error("not authorized")]
    Unauthorized,

    #[error("server returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    /// The server reported a failure inside an otherwise successful stream.
    #[error("server reported an error: {0}")]
    Server(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    pub(crate) fn network(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return TransportError::Network(format!("timed out: {e}"));
        }
        TransportError::Network(e.to_string())
    }
}
