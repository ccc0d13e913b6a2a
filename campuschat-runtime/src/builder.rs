use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use campuschat_core::config::ClientConfig;
use campuschat_engine::traits::{AudioOutput, Microphone};
use campuschat_engine::{ChatOptions, ChatSession, VoiceOptions, VoiceSession};

use crate::api_client::ApiClient;
use crate::auth_store::AuthStore;
use crate::conversation_store::ConversationStore;
use crate::defaults::{AUTH_FILE, CONVERSATIONS_FILE, DOCUMENTS_FILE};
use crate::document_store::DocumentStore;
use crate::media::{DeviceMicrophone, DeviceSpeaker};
use crate::secrets::TokenVault;

/// Everything constructed once at process start.
pub struct Runtime {
    pub config: ClientConfig,
    pub api: Arc<ApiClient>,
    pub auth: Arc<AuthStore>,
    pub conversations: Arc<ConversationStore>,
    pub documents: Arc<DocumentStore>,
}

/// Hydrates the stores under `data_dir` and wires the API client to them.
pub fn build_runtime(
    config: ClientConfig,
    data_dir: &Path,
    vault: Arc<dyn TokenVault>,
) -> anyhow::Result<Runtime> {
    let auth = Arc::new(AuthStore::open(data_dir.join(AUTH_FILE), vault).context("open auth store")?);
    let conversations = Arc::new(
        ConversationStore::open(data_dir.join(CONVERSATIONS_FILE)).context("open conversation store")?,
    );
    let documents =
        Arc::new(DocumentStore::open(data_dir.join(DOCUMENTS_FILE)).context("open document store")?);
    let api = Arc::new(ApiClient::new(&config, auth.clone()).context("build API client")?);

    log::info!(
        "runtime ready: backend={}, memory={}",
        config.base_url,
        config.use_memory
    );

    Ok(Runtime {
        config,
        api,
        auth,
        conversations,
        documents,
    })
}

impl Runtime {
    pub fn chat_session(&self) -> ChatSession {
        ChatSession::new(
            self.api.clone(),
            ChatOptions {
                stream_idle_timeout: self.config.stream_idle_timeout(),
            },
        )
    }

    /// Voice session on the system microphone and speaker.
    pub fn voice_session(&self) -> VoiceSession {
        let mic: Arc<dyn Microphone> = Arc::new(DeviceMicrophone::new(&self.config.voice));
        let out: Arc<dyn AudioOutput> =
            Arc::new(DeviceSpeaker::new(self.config.voice.speaker_device.clone()));
        self.voice_session_with(mic, out)
    }

    pub fn voice_session_with(
        &self,
        mic: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
    ) -> VoiceSession {
        VoiceSession::new(
            mic,
            self.api.clone(),
            output,
            VoiceOptions::from(&self.config.voice),
        )
    }
}
