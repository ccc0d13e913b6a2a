use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campuschat_core::api::{
    AudioBlob, ConversationSummary, DocumentInfo, Health, Stats, TextToSpeechRequest,
    UploadAccepted, UploadProgress, UploadSession, Voice,
};
use campuschat_core::config::ClientConfig;
use campuschat_core::types::{Message, SessionId};
use campuschat_engine::{ChatSession, SendOutcome, VoiceSession};
use campuschat_runtime::{AuthState, ConfigStore, Runtime, TokenVault, build_runtime};
use tokio::sync::watch;

/// The intents a front-end can issue. Constructed once per process.
#[derive(Clone)]
pub struct AppService {
    runtime: Arc<Runtime>,
    config_store: ConfigStore,
    chat: ChatSession,
}

impl AppService {
    /// Loads config (defaults on first run), hydrates the stores under
    /// `data_dir`, and restores nothing remote until asked.
    pub fn open(
        config_store: ConfigStore,
        overrides: impl FnOnce(ClientConfig) -> ClientConfig,
        data_dir: &Path,
        vault: Arc<dyn TokenVault>,
    ) -> anyhow::Result<Self> {
        let cfg = overrides(config_store.load_or_default()?);
        let runtime = build_runtime(cfg, data_dir, vault)?;
        Ok(Self::from_runtime(runtime, config_store))
    }

    pub fn from_runtime(runtime: Runtime, config_store: ConfigStore) -> Self {
        let chat = runtime.chat_session();
        Self {
            runtime: Arc::new(runtime),
            config_store,
            chat,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.runtime.config
    }

    pub fn config_path(&self) -> &Path {
        self.config_store.path()
    }

    /// Persists `cfg`; it takes effect on the next start.
    pub fn save_config(&self, cfg: &ClientConfig) -> anyhow::Result<()> {
        self.config_store.save(cfg)
    }

    // --- auth ---

    pub async fn login(&self, email: &str, password: &str) -> anyhow::Result<AuthState> {
        let resp = self.runtime.api.login(email, password).await.context("sign in")?;
        self.runtime.auth.sign_in(&resp, email.trim())?;
        Ok(self.runtime.auth.state())
    }

    /// Forgets the token and every cached personal item.
    pub fn logout(&self) -> anyhow::Result<()> {
        self.runtime.auth.sign_out()?;
        self.chat.clear();
        self.runtime.conversations.clear()?;
        Ok(())
    }

    pub fn auth_state(&self) -> AuthState {
        self.runtime.auth.state()
    }

    pub fn watch_auth(&self) -> watch::Receiver<AuthState> {
        self.runtime.auth.subscribe()
    }

    // --- chat ---

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub async fn send_message(&self, text: &str) -> anyhow::Result<SendOutcome> {
        let outcome = self.chat.send(text).await?;
        if let Some(id) = self.chat.session_id() {
            if self.runtime.conversations.active().as_ref() != Some(&id) {
                self.runtime.conversations.set_active(Some(id))?;
            }
        }
        Ok(outcome)
    }

    pub fn new_conversation(&self) -> anyhow::Result<()> {
        self.chat.new_conversation()?;
        self.runtime.conversations.set_active(None)
    }

    /// Reopens the conversation that was active when the app last ran.
    pub async fn resume_last_conversation(&self) -> anyhow::Result<Option<SessionId>> {
        let Some(id) = self.runtime.conversations.active() else {
            return Ok(None);
        };
        log::info!("resuming conversation {id}");
        self.chat.switch_session(id.clone()).await?;
        Ok(Some(id))
    }

    pub async fn switch_conversation(&self, id: SessionId) -> anyhow::Result<()> {
        self.chat.switch_session(id.clone()).await?;
        self.runtime.conversations.set_active(Some(id))
    }

    /// The signed-in user's conversations; refreshes the local cache.
    pub async fn list_conversations(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        let list = self
            .runtime
            .api
            .my_conversations()
            .await
            .context("list conversations")?;
        self.runtime.conversations.replace_summaries(list.clone())?;
        Ok(list)
    }

    /// Every conversation the backend knows about (admin view).
    pub async fn list_all_conversations(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        Ok(self
            .runtime
            .api
            .conversations()
            .await
            .context("list all conversations")?)
    }

    pub fn cached_conversations(&self) -> Vec<ConversationSummary> {
        self.runtime.conversations.summaries()
    }

    pub async fn create_conversation(&self, title: Option<String>) -> anyhow::Result<ConversationSummary> {
        let created = self
            .runtime
            .api
            .create_conversation(title)
            .await
            .context("create conversation")?;
        let mut list = self.runtime.conversations.summaries();
        list.insert(0, created.clone());
        self.runtime.conversations.replace_summaries(list)?;
        Ok(created)
    }

    pub async fn delete_conversation(&self, id: &SessionId) -> anyhow::Result<()> {
        self.runtime
            .api
            .delete_conversation(id)
            .await
            .with_context(|| format!("delete conversation {id}"))?;
        self.runtime.conversations.remove(id)?;
        if self.chat.session_id().as_ref() == Some(id) {
            self.chat.new_conversation()?;
        }
        Ok(())
    }

    pub async fn delete_my_conversations(&self) -> anyhow::Result<()> {
        self.runtime
            .api
            .delete_my_conversations()
            .await
            .context("delete conversations")?;
        self.runtime.conversations.clear()?;
        self.chat.new_conversation()?;
        Ok(())
    }

    pub async fn chat_history(&self) -> anyhow::Result<Vec<Message>> {
        Ok(self.runtime.api.chat_history().await.context("load chat history")?)
    }

    pub async fn clear_chat_history(&self) -> anyhow::Result<()> {
        self.runtime
            .api
            .clear_chat_history()
            .await
            .context("clear chat history")?;
        self.chat.clear();
        Ok(())
    }

    // --- documents ---

    pub async fn upload_document(&self, path: &Path) -> anyhow::Result<UploadAccepted> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let mime = mime_for_path(path);

        log::info!("uploading {filename} ({} bytes, {mime})", bytes.len());
        let accepted = self
            .runtime
            .api
            .upload(&filename, &mime, &bytes)
            .await
            .with_context(|| format!("upload {filename}"))?;

        let initial = UploadProgress {
            status: accepted.status.clone().unwrap_or_else(|| "pending".into()),
            progress: 0.0,
            message: accepted.message.clone(),
            chunk_count: None,
            error: None,
        };
        self.runtime
            .documents
            .record_progress(&accepted.upload_id, Some(&filename), &initial)?;
        Ok(accepted)
    }

    pub async fn upload_progress(&self, upload_id: &str) -> anyhow::Result<UploadProgress> {
        let progress = self
            .runtime
            .api
            .upload_progress(upload_id)
            .await
            .context("upload progress")?;
        self.runtime
            .documents
            .record_progress(upload_id, None, &progress)?;
        Ok(progress)
    }

    /// Polls until the upload finishes or fails, reporting each step. A
    /// finished upload refreshes the document list.
    pub async fn wait_for_upload(
        &self,
        upload_id: &str,
        every: Duration,
        mut on_progress: impl FnMut(&UploadProgress),
    ) -> anyhow::Result<UploadProgress> {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let progress = self.upload_progress(upload_id).await?;
            on_progress(&progress);
            if progress.is_finished() {
                if let Err(e) = self.list_documents().await {
                    log::warn!("document refresh after upload failed: {e:#}");
                }
                return Ok(progress);
            }
            if progress.is_failed() {
                let why = progress
                    .error
                    .clone()
                    .or_else(|| progress.message.clone())
                    .unwrap_or_else(|| progress.status.clone());
                anyhow::bail!("processing failed: {why}");
            }
        }
    }

    pub async fn upload_sessions(&self) -> anyhow::Result<Vec<UploadSession>> {
        let sessions = self
            .runtime
            .api
            .upload_sessions()
            .await
            .context("list upload sessions")?;
        self.runtime.documents.replace_upload_sessions(sessions.clone())?;
        Ok(sessions)
    }

    pub async fn list_documents(&self) -> anyhow::Result<Vec<DocumentInfo>> {
        let docs = self.runtime.api.documents().await.context("list documents")?;
        self.runtime.documents.replace_documents(docs.clone())?;
        Ok(docs)
    }

    pub async fn get_document(&self, id: &str) -> anyhow::Result<DocumentInfo> {
        let doc = self
            .runtime
            .api
            .document(id)
            .await
            .with_context(|| format!("get document {id}"))?;
        self.runtime.documents.upsert_document(doc.clone())?;
        Ok(doc)
    }

    pub async fn delete_document(&self, id: &str) -> anyhow::Result<()> {
        self.runtime
            .api
            .delete_document(id)
            .await
            .with_context(|| format!("delete document {id}"))?;
        self.runtime.documents.remove_document(id)
    }

    pub fn cached_documents(&self) -> Vec<DocumentInfo> {
        self.runtime.documents.documents()
    }

    // --- admin ---

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        Ok(self.runtime.api.stats().await.context("load stats")?)
    }

    pub async fn health(&self) -> anyhow::Result<Health> {
        Ok(self.runtime.api.health().await.context("health check")?)
    }

    // --- speech ---

    pub async fn voices(&self) -> anyhow::Result<Vec<Voice>> {
        Ok(self.runtime.api.voices().await.context("list voices")?)
    }

    pub async fn text_to_speech(&self, text: &str, voice: Option<String>) -> anyhow::Result<AudioBlob> {
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("nothing to speak");
        }
        Ok(self
            .runtime
            .api
            .text_to_speech(&TextToSpeechRequest {
                text: text.to_string(),
                voice,
            })
            .await
            .context("text to speech")?)
    }

    /// A voice session on the system devices, tied to the open conversation.
    pub fn voice_session(&self) -> VoiceSession {
        let session = self.runtime.voice_session();
        session.set_conversation(self.chat.session_id());
        session
    }
}

fn mime_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Default data directory next to a config file, for `--config` overrides.
pub fn data_dir_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(campuschat_runtime::defaults::data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for_path(Path::new("a/Syllabus.PDF")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("notes.txt")), "text/plain");
        assert_eq!(mime_for_path(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn data_dir_follows_config() {
        assert_eq!(
            data_dir_for(Path::new("/tmp/cc/config.json")),
            PathBuf::from("/tmp/cc")
        );
    }
}
