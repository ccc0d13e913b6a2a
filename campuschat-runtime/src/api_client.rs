//! Authenticated access to every backend endpoint.
//!
//! Any 401 invalidates the shared [`AuthStore`] before the error is returned,
//! so every caller sees the same global sign-out.

use std::sync::Arc;

use async_trait::async_trait;
use campuschat_core::api::{
    AudioBlob, AudioPayload, ChatReply, ChatRequest, ConversationSummary, DocumentInfo, Health,
    LoginRequest, LoginResponse, NewConversationRequest, Stats, TextToSpeechRequest,
    UploadAccepted, UploadProgress, UploadSession, Voice,
};
use campuschat_core::config::ClientConfig;
use campuschat_core::types::{Message, SessionId};
use campuschat_engine::traits::{ChatTransport, VoiceBackend};
use campuschat_providers::endpoints::Endpoints;
use campuschat_providers::parse;
use campuschat_providers::request::HttpRequest;
use campuschat_providers::{ByteStream, HttpResponse, HttpRuntime, TransportError};

use crate::auth_store::AuthStore;

pub struct ApiClient {
    http: HttpRuntime,
    endpoints: Endpoints,
    auth: Arc<AuthStore>,
    use_memory: bool,
    history_limit: u32,
}

impl ApiClient {
    pub fn new(cfg: &ClientConfig, auth: Arc<AuthStore>) -> Result<Self, TransportError> {
        Ok(Self {
            http: HttpRuntime::new(cfg.connect_timeout(), cfg.request_timeout())?,
            endpoints: Endpoints::new(&cfg.base_url)?,
            auth,
            use_memory: cfg.use_memory,
            history_limit: cfg.history_limit,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    pub fn uses_memory(&self) -> bool {
        self.use_memory
    }

    fn token(&self) -> Option<String> {
        self.auth.token()
    }

    fn guard<T>(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if matches!(result, Err(TransportError::Unauthorized)) {
            self.auth.invalidate();
        }
        result
    }

    async fn call<T>(
        &self,
        req: HttpRequest,
        parse: fn(HttpResponse) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let result = match self.http.execute(&req).await {
            Ok(resp) => parse(resp),
            Err(e) => Err(e),
        };
        self.guard(result)
    }

    /// Exchanges credentials for a token. A 401 here means bad credentials,
    /// so it is reported with the server's detail and does not touch the
    /// current session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, TransportError> {
        let req = self.endpoints.login(&LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        });
        let resp = self.http.execute(&req).await?;
        if resp.status == 401 {
            return Err(TransportError::Status {
                status: 401,
                detail: parse::error_detail(&resp.body),
            });
        }
        parse::parse_login(resp)
    }

    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatReply, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.chat(req, self.use_memory, token.as_deref()),
            parse::parse_chat_reply,
        )
        .await
    }

    pub async fn chat_stream(&self, req: &ChatRequest) -> Result<ByteStream, TransportError> {
        let token = self.token();
        let http = self
            .endpoints
            .chat_stream(req, self.use_memory, token.as_deref());
        let result = self.http.open_stream(&http).await;
        self.guard(result)
    }

    pub async fn chat_history(&self) -> Result<Vec<Message>, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.chat_history(self.history_limit, token.as_deref()),
            parse::parse_history,
        )
        .await
    }

    pub async fn clear_chat_history(&self) -> Result<(), TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.clear_chat_history(token.as_deref()),
            parse::parse_empty,
        )
        .await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.conversations(token.as_deref()),
            parse::parse_conversations,
        )
        .await
    }

    pub async fn my_conversations(&self) -> Result<Vec<ConversationSummary>, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.my_conversations(token.as_deref()),
            parse::parse_conversations,
        )
        .await
    }

    pub async fn conversation_messages(&self, id: &SessionId) -> Result<Vec<Message>, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.conversation(id, token.as_deref()),
            parse::parse_conversation_messages,
        )
        .await
    }

    pub async fn create_conversation(
        &self,
        title: Option<String>,
    ) -> Result<ConversationSummary, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints
                .create_conversation(&NewConversationRequest { title }, token.as_deref()),
            parse::parse_conversation_summary,
        )
        .await
    }

    pub async fn delete_conversation(&self, id: &SessionId) -> Result<(), TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.delete_conversation(id, token.as_deref()),
            parse::parse_empty,
        )
        .await
    }

    pub async fn delete_my_conversations(&self) -> Result<(), TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.delete_my_conversations(token.as_deref()),
            parse::parse_empty,
        )
        .await
    }

    pub async fn upload(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<UploadAccepted, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints
                .upload(filename, mime_type, bytes, token.as_deref()),
            parse::parse_upload_accepted,
        )
        .await
    }

    pub async fn upload_progress(&self, upload_id: &str) -> Result<UploadProgress, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.upload_progress(upload_id, token.as_deref()),
            parse::parse_upload_progress,
        )
        .await
    }

    pub async fn upload_sessions(&self) -> Result<Vec<UploadSession>, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.upload_sessions(token.as_deref()),
            parse::parse_upload_sessions,
        )
        .await
    }

    pub async fn documents(&self) -> Result<Vec<DocumentInfo>, TransportError> {
        let token = self.token();
        self.call(self.endpoints.documents(token.as_deref()), parse::parse_documents)
            .await
    }

    pub async fn document(&self, id: &str) -> Result<DocumentInfo, TransportError> {
        let token = self.token();
        self.call(self.endpoints.document(id, token.as_deref()), parse::parse_document)
            .await
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.delete_document(id, token.as_deref()),
            parse::parse_empty,
        )
        .await
    }

    pub async fn stats(&self) -> Result<Stats, TransportError> {
        let token = self.token();
        self.call(self.endpoints.stats(token.as_deref()), parse::parse_stats)
            .await
    }

    pub async fn health(&self) -> Result<Health, TransportError> {
        self.call(self.endpoints.health(), parse::parse_health).await
    }

    pub async fn text_to_speech(&self, req: &TextToSpeechRequest) -> Result<AudioBlob, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints.text_to_speech(req, token.as_deref()),
            parse::parse_audio,
        )
        .await
    }

    pub async fn voices(&self) -> Result<Vec<Voice>, TransportError> {
        let token = self.token();
        self.call(self.endpoints.voices(token.as_deref()), parse::parse_voices)
            .await
    }

    pub async fn speech_to_speech(
        &self,
        audio: &AudioPayload,
        session: Option<&SessionId>,
    ) -> Result<AudioBlob, TransportError> {
        let token = self.token();
        self.call(
            self.endpoints
                .speech_to_speech(audio, session, self.use_memory, token.as_deref()),
            parse::parse_audio,
        )
        .await
    }
}

#[async_trait]
impl ChatTransport for ApiClient {
    async fn open_chat_stream(&self, req: &ChatRequest) -> Result<ByteStream, TransportError> {
        self.chat_stream(req).await
    }

    async fn send_chat(&self, req: &ChatRequest) -> Result<ChatReply, TransportError> {
        self.chat(req).await
    }

    async fn load_history(&self, session: &SessionId) -> Result<Vec<Message>, TransportError> {
        self.conversation_messages(session).await
    }
}

#[async_trait]
impl VoiceBackend for ApiClient {
    async fn respond(
        &self,
        audio: AudioPayload,
        session: Option<SessionId>,
    ) -> Result<AudioBlob, TransportError> {
        self.speech_to_speech(&audio, session.as_ref()).await
    }
}
