//! Folds a decoded response stream into the visible transcript.
//!
//! One `ChatSession` owns the message log of the active conversation. Every
//! state change is published as a `ChatView` snapshot on a watch channel.

use crate::traits::ChatTransport;
use campuschat_core::api::ChatRequest;
use campuschat_core::events::StreamEvent;
use campuschat_core::text::{looks_like_json_fragment, preview_text};
use campuschat_core::types::{ConversationSession, Message, SessionId, SessionInfo};
use campuschat_providers::{StreamDecoder, TransportError};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub const APOLOGY_MESSAGE: &str =
    "Sorry, I couldn't get a response right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPhase {
    #[default]
    Idle,
    /// Request sent, no content yet.
    Loading,
    Streaming,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChatView {
    pub messages: Vec<Message>,
    pub partial_text: String,
    pub phase: ChatPhase,
    pub session: Option<SessionInfo>,
    pub last_error: Option<String>,
}

impl ChatView {
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, ChatPhase::Loading | ChatPhase::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("another chat request is still running")]
    SendInFlight,

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How a `send` ended. Failures are already reflected in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Streamed,
    /// The stream failed and the non-streamed endpoint answered instead.
    FellBack,
    /// Both attempts failed; the apology message was committed.
    Failed,
    /// The server rejected the credentials; the session was invalidated upstream.
    Unauthorized,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// `None` waits on a silent stream indefinitely.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            stream_idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Default)]
struct ChatState {
    conversation: ConversationSession,
    partial: String,
    phase: ChatPhase,
    last_error: Option<String>,
    // The next send asks the server for a fresh conversation.
    start_new: bool,
}

impl ChatState {
    fn view(&self) -> ChatView {
        ChatView {
            messages: self.conversation.messages.clone(),
            partial_text: self.partial.clone(),
            phase: self.phase,
            session: self
                .conversation
                .session_id
                .as_ref()
                .map(|id| SessionInfo {
                    session_id: id.clone(),
                    message_count: self.conversation.message_count,
                    is_new_conversation: self.conversation.is_new_conversation,
                }),
            last_error: self.last_error.clone(),
        }
    }
}

struct Shared {
    transport: Arc<dyn ChatTransport>,
    options: ChatOptions,
    state: Mutex<ChatState>,
    in_flight: AtomicBool,
    view: watch::Sender<ChatView>,
}

/// Per-send bookkeeping.
#[derive(Debug, Default)]
struct Turn {
    prior_len: usize,
    // A completion (or a `done` content frame) has been seen.
    terminal: bool,
    // Latest non-blank text the server sent as the whole reply.
    final_text: Option<String>,
    // Latest session info from any completion.
    session: Option<SessionInfo>,
    committed: bool,
    reload: Option<SessionId>,
}

#[derive(Clone)]
pub struct ChatSession {
    shared: Arc<Shared>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>, options: ChatOptions) -> Self {
        let (view, _) = watch::channel(ChatView::default());
        Self {
            shared: Arc::new(Shared {
                transport,
                options,
                state: Mutex::new(ChatState::default()),
                in_flight: AtomicBool::new(false),
                view,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.shared.view.subscribe()
    }

    pub fn snapshot(&self) -> ChatView {
        self.lock().view()
    }

    pub fn is_sending(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().conversation.session_id.clone()
    }

    /// Sends one user message and streams the reply into the transcript.
    ///
    /// Only one send may be outstanding; a second call while the first is in
    /// flight returns `ChatError::SendInFlight` without touching the log.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let _in_flight = self.claim()?;

        let (request, prior_len) = self.update(|st| {
            let prior_len = st.conversation.messages.len();
            st.conversation.messages.push(Message::user(text));
            st.partial.clear();
            st.phase = ChatPhase::Loading;
            st.last_error = None;
            let request = ChatRequest {
                message: text.to_string(),
                session_id: st.conversation.session_id.clone(),
                start_new_conversation: st.start_new.then_some(true),
            };
            (request, prior_len)
        });

        let mut turn = Turn {
            prior_len,
            ..Default::default()
        };

        let outcome = match self.stream_turn(&request, &mut turn).await {
            Ok(()) => SendOutcome::Streamed,
            Err(e) if e.is_unauthorized() => {
                self.fail(e.to_string(), false);
                SendOutcome::Unauthorized
            }
            Err(e) => {
                log::warn!("chat stream failed, falling back to a plain request: {e}");
                self.fallback(&request, &mut turn).await
            }
        };

        if let Some(id) = turn.reload.take() {
            self.reload_after_adopt(&id).await;
        }

        Ok(outcome)
    }

    async fn stream_turn(&self, request: &ChatRequest, turn: &mut Turn) -> Result<(), TransportError> {
        let mut stream = self.shared.transport.open_chat_stream(request).await?;
        let mut decoder = StreamDecoder::new();

        // Completion information may repeat, and the last copy can carry the
        // session fields; read to end of stream before committing.
        loop {
            let next = match self.shared.options.stream_idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) if turn.terminal => {
                        log::debug!("stream went quiet after completion; closing it");
                        None
                    }
                    Err(_) => return Err(TransportError::IdleTimeout(limit)),
                },
                None => stream.next().await,
            };
            let next = match next {
                Some(Err(e)) if turn.terminal => {
                    log::warn!("stream broke after completion: {e}");
                    None
                }
                other => other,
            };

            match next {
                Some(Ok(chunk)) => {
                    for event in decoder.feed(&chunk) {
                        self.apply(event, turn)?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    let mut events = decoder.finish();
                    // The closing completion restates earlier ones; its text
                    // is the bare delta concatenation, which misses salvaged
                    // plain lines already in the buffer. Only its session counts.
                    let closing = events.pop();
                    for event in events {
                        self.apply(event, turn)?;
                    }
                    if let Some(StreamEvent::Complete {
                        session: Some(info),
                        ..
                    }) = closing
                    {
                        turn.session = Some(info);
                    }
                    break;
                }
            }
        }

        let text = turn
            .final_text
            .take()
            .unwrap_or_else(|| self.lock().partial.clone());
        if text.trim().is_empty() {
            return Err(TransportError::Decode("stream ended without a response".into()));
        }
        let session = turn.session.take();
        self.commit(&text, session.as_ref(), turn);
        Ok(())
    }

    fn apply(&self, event: StreamEvent, turn: &mut Turn) -> Result<(), TransportError> {
        match event {
            StreamEvent::ContentDelta(text) => {
                if turn.terminal {
                    log::debug!("ignoring content after completion: {}", preview_text(&text));
                } else {
                    self.update(|st| append_partial(st, &text));
                }
            }
            StreamEvent::Unparseable(raw) => {
                if turn.terminal || looks_like_json_fragment(&raw) {
                    log::debug!("dropping stream debris: {}", preview_text(&raw));
                } else {
                    self.update(|st| {
                        if !st.partial.is_empty() && !st.partial.ends_with('\n') {
                            append_partial(st, "\n");
                        }
                        append_partial(st, &raw);
                    });
                }
            }
            StreamEvent::ServerError(message) => {
                if turn.terminal {
                    log::warn!("ignoring server error after completion: {message}");
                } else {
                    return Err(TransportError::Server(message));
                }
            }
            StreamEvent::Complete {
                final_text,
                session,
            } => {
                turn.terminal = true;
                if let Some(text) = final_text.filter(|t| !t.trim().is_empty()) {
                    turn.final_text = Some(text);
                }
                if let Some(info) = session {
                    turn.session = Some(info);
                }
            }
        }
        Ok(())
    }

    /// Appends the assistant message. Runs at most once per turn.
    fn commit(&self, text: &str, session: Option<&SessionInfo>, turn: &mut Turn) {
        if turn.committed {
            return;
        }
        turn.committed = true;
        self.update(|st| {
            st.conversation.messages.push(Message::assistant(text));
            st.partial.clear();
            st.phase = ChatPhase::Idle;
            if let Some(info) = session {
                adopt_session(st, info, turn);
            }
        });
    }

    async fn fallback(&self, request: &ChatRequest, turn: &mut Turn) -> SendOutcome {
        match self.shared.transport.send_chat(request).await {
            Ok(reply) if !reply.response.trim().is_empty() => {
                let info = reply.session_info();
                self.commit(&reply.response, info.as_ref(), turn);
                SendOutcome::FellBack
            }
            Ok(_) => {
                log::error!("fallback chat reply was empty");
                self.fail("empty response from server".into(), true);
                SendOutcome::Failed
            }
            Err(e) if e.is_unauthorized() => {
                self.fail(e.to_string(), false);
                SendOutcome::Unauthorized
            }
            Err(e) => {
                log::error!("fallback chat request failed: {e}");
                self.fail(e.to_string(), true);
                SendOutcome::Failed
            }
        }
    }

    fn fail(&self, error: String, apologize: bool) {
        self.update(|st| {
            if apologize {
                st.conversation
                    .messages
                    .push(Message::assistant(APOLOGY_MESSAGE));
            }
            st.partial.clear();
            st.phase = ChatPhase::Error;
            st.last_error = Some(error);
        });
    }

    async fn reload_after_adopt(&self, id: &SessionId) {
        match self.shared.transport.load_history(id).await {
            Ok(messages) if !messages.is_empty() => {
                self.update(|st| {
                    if st.conversation.session_id.as_ref() == Some(id) {
                        st.conversation.messages = messages;
                    }
                });
            }
            Ok(_) => {}
            Err(e) => log::warn!("history reload for {id} failed: {e}"),
        }
    }

    /// Makes `id` the active conversation and loads its turns with exactly
    /// one history request. Nothing from the previous conversation remains
    /// visible while the fetch is outstanding.
    pub async fn switch_session(&self, id: SessionId) -> Result<(), ChatError> {
        // The fetch replaces the log, so it excludes sends like another send.
        let _in_flight = self.claim()?;

        self.update(|st| {
            st.conversation = ConversationSession {
                session_id: Some(id.clone()),
                ..Default::default()
            };
            st.partial.clear();
            st.phase = ChatPhase::Loading;
            st.last_error = None;
            st.start_new = false;
        });

        self.fetch_history(&id).await
    }

    /// Re-fetches the active conversation's turns.
    pub async fn load_history(&self) -> Result<(), ChatError> {
        let Some(id) = self.session_id() else {
            return Ok(());
        };
        let _in_flight = self.claim()?;
        self.update(|st| st.phase = ChatPhase::Loading);
        self.fetch_history(&id).await
    }

    async fn fetch_history(&self, id: &SessionId) -> Result<(), ChatError> {
        let result = self.shared.transport.load_history(id).await;
        self.update(|st| {
            // A later switch owns the log now.
            if st.conversation.session_id.as_ref() != Some(id) {
                return;
            }
            match &result {
                Ok(messages) => {
                    st.conversation.messages = messages.clone();
                    st.conversation.message_count =
                        u32::try_from(messages.len()).unwrap_or(u32::MAX);
                    st.phase = ChatPhase::Idle;
                }
                Err(e) => {
                    st.phase = ChatPhase::Error;
                    st.last_error = Some(e.to_string());
                }
            }
        });
        result.map(|_| ()).map_err(ChatError::from)
    }

    /// Drops the local transcript; the next send starts a fresh conversation.
    pub fn new_conversation(&self) -> Result<(), ChatError> {
        if self.is_sending() {
            return Err(ChatError::SendInFlight);
        }
        self.update(|st| {
            *st = ChatState {
                start_new: true,
                ..Default::default()
            };
        });
        Ok(())
    }

    /// Forgets the local transcript and session without asking for a new one.
    pub fn clear(&self) {
        self.update(|st| {
            st.conversation = ConversationSession::default();
            st.partial.clear();
            st.last_error = None;
            if !matches!(st.phase, ChatPhase::Loading | ChatPhase::Streaming) {
                st.phase = ChatPhase::Idle;
            }
        });
    }

    /// Marks a log-replacing operation as running; released on drop.
    fn claim(&self) -> Result<InFlightGuard<'_>, ChatError> {
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            return Err(ChatError::SendInFlight);
        }
        Ok(InFlightGuard {
            shared: &self.shared,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let (out, view) = {
            let mut st = self.lock();
            let out = f(&mut st);
            (out, st.view())
        };
        self.shared.view.send_replace(view);
        out
    }
}

fn append_partial(st: &mut ChatState, text: &str) {
    st.partial.push_str(text);
    if st.phase == ChatPhase::Loading && !st.partial.is_empty() {
        st.phase = ChatPhase::Streaming;
    }
}

fn adopt_session(st: &mut ChatState, info: &SessionInfo, turn: &mut Turn) {
    let changed = st.conversation.session_id.as_ref() != Some(&info.session_id);
    st.conversation.adopt(info);
    st.start_new = false;
    if changed && turn.prior_len < 2 {
        turn.reload = Some(info.session_id.clone());
    }
}

/// Clears the in-flight flag even when the send future is dropped midway.
struct InFlightGuard<'a> {
    shared: &'a Shared,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let view = {
            let mut st = self
                .shared
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if matches!(st.phase, ChatPhase::Loading | ChatPhase::Streaming) {
                st.partial.clear();
                st.phase = ChatPhase::Idle;
            }
            st.view()
        };
        self.shared.view.send_replace(view);
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use campuschat_core::api::ChatReply;
    use campuschat_core::types::Role;
    use campuschat_providers::ByteStream;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeTransport {
        stream_chunks: Mutex<Option<Vec<Result<Vec<u8>, TransportError>>>>,
        stream_error: Mutex<Option<TransportError>>,
        reply: Mutex<Option<Result<ChatReply, TransportError>>>,
        history: Mutex<Vec<Message>>,
        history_calls: AtomicUsize,
        fallback_calls: AtomicUsize,
    }

    impl FakeTransport {
        fn streaming(lines: &[&str]) -> Self {
            let chunks = lines.iter().map(|l| Ok(l.as_bytes().to_vec())).collect();
            Self {
                stream_chunks: Mutex::new(Some(chunks)),
                ..Default::default()
            }
        }

        fn failing(err: TransportError) -> Self {
            Self {
                stream_error: Mutex::new(Some(err)),
                ..Default::default()
            }
        }

        fn with_reply(self, reply: Result<ChatReply, TransportError>) -> Self {
            *self.reply.lock().unwrap() = Some(reply);
            self
        }

        fn with_history(self, history: Vec<Message>) -> Self {
            *self.history.lock().unwrap() = history;
            self
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn open_chat_stream(&self, _req: &ChatRequest) -> Result<ByteStream, TransportError> {
            if let Some(e) = self.stream_error.lock().unwrap().clone() {
                return Err(e);
            }
            let chunks = self.stream_chunks.lock().unwrap().take().unwrap_or_default();
            // Yield between chunks like a real socket so watchers observe each step.
            Ok(Box::pin(futures_util::stream::iter(chunks).then(|c| async move {
                tokio::task::yield_now().await;
                c
            })))
        }

        async fn send_chat(&self, _req: &ChatRequest) -> Result<ChatReply, TransportError> {
            self.fallback_calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(TransportError::Network("offline".into())))
        }

        async fn load_history(&self, _session: &SessionId) -> Result<Vec<Message>, TransportError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.history.lock().unwrap().clone())
        }
    }

    fn session(transport: FakeTransport) -> (ChatSession, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        let chat = ChatSession::new(transport.clone(), ChatOptions::default());
        (chat, transport)
    }

    fn assistant_texts(view: &ChatView) -> Vec<String> {
        view.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn deltas_fold_into_one_message() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"content\",\"content\":\"Hel\",\"done\":false}\n",
            "data: {\"type\":\"content\",\"content\":\"lo \",\"done\":false}\n",
            "data: {\"type\":\"content\",\"content\":\"world\",\"done\":false}\n",
            "data: {\"type\":\"complete\",\"done\":true}\n",
        ]));

        assert_eq!(chat.send("hi").await.unwrap(), SendOutcome::Streamed);
        let view = chat.snapshot();
        assert_eq!(assistant_texts(&view), vec!["Hello world"]);
        assert_eq!(view.messages[0].content, "hi");
        assert_eq!(view.partial_text, "");
        assert_eq!(view.phase, ChatPhase::Idle);
        assert!(!chat.is_sending());
    }

    #[tokio::test]
    async fn duplicate_completions_commit_once() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"content\",\"content\":\"Hi\",\"done\":false}\n",
            "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Hi there\"}\n\
             data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Hi there\"}\n",
            "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Hi there\"}\n",
        ]));

        chat.send("hello").await.unwrap();
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["Hi there"]);
    }

    #[tokio::test]
    async fn server_full_text_beats_local_buffer() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"content\",\"content\":\"Hi th\",\"done\":false}\n",
            "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Hi there!\"}\n",
        ]));
        chat.send("hello").await.unwrap();
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["Hi there!"]);
    }

    #[tokio::test]
    async fn stream_without_completion_commits_accumulated_text() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"content\",\"content\":\"partial answer\",\"done\":false}\n",
        ]));
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Streamed);
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["partial answer"]);
    }

    #[tokio::test]
    async fn loading_flips_to_streaming_once_content_arrives() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"content\",\"content\":\"\",\"done\":false}\n",
            "data: {\"type\":\"content\",\"content\":\"a\",\"done\":false}\n",
            "data: {\"type\":\"content\",\"content\":\"b\",\"done\":false}\n",
            "data: {\"type\":\"complete\",\"done\":true}\n",
        ]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut views = chat.subscribe();
        let watcher = tokio::spawn(async move {
            while views.changed().await.is_ok() {
                let v = views.borrow_and_update().clone();
                if tx.send(v).is_err() {
                    break;
                }
            }
        });

        chat.send("go").await.unwrap();
        drop(chat);
        let _ = watcher.await;

        let mut phases = Vec::new();
        while let Ok(v) = rx.try_recv() {
            if v.phase == ChatPhase::Streaming {
                assert!(!v.partial_text.is_empty());
            }
            if phases.last() != Some(&v.phase) {
                phases.push(v.phase);
            }
        }
        assert_eq!(
            phases,
            vec![ChatPhase::Loading, ChatPhase::Streaming, ChatPhase::Idle]
        );
    }

    #[tokio::test]
    async fn hard_failure_falls_back_to_plain_request() {
        let reply = ChatReply {
            response: "From fallback".into(),
            sources: vec![],
            timestamp: None,
            session_id: Some(SessionId::new("s1")),
            message_count: Some(2),
            is_new_conversation: Some(true),
        };
        let (chat, transport) = session(
            FakeTransport::failing(TransportError::Status {
                status: 502,
                detail: "bad gateway".into(),
            })
            .with_reply(Ok(reply)),
        );

        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::FellBack);
        let view = chat.snapshot();
        assert_eq!(assistant_texts(&view), vec!["From fallback"]);
        assert_eq!(view.session.unwrap().session_id.as_str(), "s1");
        assert_eq!(transport.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn double_failure_commits_apology() {
        let (chat, _) = session(FakeTransport::failing(TransportError::Network("down".into())));
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Failed);
        let view = chat.snapshot();
        assert_eq!(assistant_texts(&view), vec![APOLOGY_MESSAGE]);
        assert_eq!(view.phase, ChatPhase::Error);
        assert!(view.last_error.is_some());
        assert_eq!(view.partial_text, "");
        assert!(!chat.is_sending());
    }

    #[tokio::test]
    async fn mid_stream_failure_discards_partial_and_falls_back() {
        let transport = FakeTransport {
            stream_chunks: Mutex::new(Some(vec![
                Ok(b"data: {\"type\":\"content\",\"content\":\"half\"}\n".to_vec()),
                Err(TransportError::Network("reset".into())),
            ])),
            ..Default::default()
        };
        let (chat, _) = session(transport);
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Failed);
        let view = chat.snapshot();
        assert_eq!(assistant_texts(&view), vec![APOLOGY_MESSAGE]);
        assert_eq!(view.partial_text, "");
    }

    #[tokio::test]
    async fn server_error_event_is_a_hard_failure() {
        let (chat, transport) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"error\",\"message\":\"overloaded\"}\n",
        ]));
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Failed);
        assert_eq!(transport.fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_skips_fallback_and_apology() {
        let (chat, transport) = session(FakeTransport::failing(TransportError::Unauthorized));
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Unauthorized);
        assert_eq!(transport.fallback_calls.load(Ordering::SeqCst), 0);
        let view = chat.snapshot();
        assert!(assistant_texts(&view).is_empty());
        assert_eq!(view.phase, ChatPhase::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_hits_idle_timeout() {
        struct Stalled;

        #[async_trait]
        impl ChatTransport for Stalled {
            async fn open_chat_stream(&self, _req: &ChatRequest) -> Result<ByteStream, TransportError> {
                Ok(Box::pin(futures_util::stream::pending()))
            }
            async fn send_chat(&self, _req: &ChatRequest) -> Result<ChatReply, TransportError> {
                Err(TransportError::Network("down".into()))
            }
            async fn load_history(&self, _s: &SessionId) -> Result<Vec<Message>, TransportError> {
                Ok(vec![])
            }
        }

        let chat = ChatSession::new(
            Arc::new(Stalled),
            ChatOptions {
                stream_idle_timeout: Some(Duration::from_secs(5)),
            },
        );
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Failed);
        assert_eq!(chat.snapshot().phase, ChatPhase::Error);
    }

    #[tokio::test]
    async fn second_send_is_rejected_while_streaming() {
        struct Gated {
            release: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
        }

        #[async_trait]
        impl ChatTransport for Gated {
            async fn open_chat_stream(&self, _req: &ChatRequest) -> Result<ByteStream, TransportError> {
                let rx = self.release.lock().await.take();
                let head = futures_util::stream::iter(vec![Ok(
                    b"data: {\"type\":\"content\",\"content\":\"A-reply\"}\n".to_vec(),
                )]);
                let tail = futures_util::stream::once(async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok(b"data: {\"type\":\"complete\",\"done\":true}\n".to_vec())
                });
                Ok(Box::pin(head.chain(tail)))
            }
            async fn send_chat(&self, _req: &ChatRequest) -> Result<ChatReply, TransportError> {
                Err(TransportError::Network("unused".into()))
            }
            async fn load_history(&self, _s: &SessionId) -> Result<Vec<Message>, TransportError> {
                Ok(vec![])
            }
        }

        let (release_tx, release_rx) = tokio::sync::oneshot::channel();
        let chat = ChatSession::new(
            Arc::new(Gated {
                release: tokio::sync::Mutex::new(Some(release_rx)),
            }),
            ChatOptions::default(),
        );

        let first = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send("A").await })
        };

        let mut views = chat.subscribe();
        views
            .wait_for(|v| v.phase == ChatPhase::Streaming)
            .await
            .unwrap();

        assert_eq!(chat.send("B").await, Err(ChatError::SendInFlight));
        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), SendOutcome::Streamed);

        let view = chat.snapshot();
        let users: Vec<_> = view
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(users, vec!["A"]);
        assert_eq!(assistant_texts(&view), vec!["A-reply"]);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (chat, _) = session(FakeTransport::default());
        assert_eq!(chat.send("   ").await, Err(ChatError::EmptyMessage));
        assert!(chat.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn new_session_id_on_empty_log_reloads_history_once() {
        let history = vec![
            Message::user("earlier"),
            Message::assistant("earlier answer"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (chat, transport) = session(
            FakeTransport::streaming(&[
                "data: {\"type\":\"content\",\"content\":\"hello\"}\n",
                "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"hello\",\"session_id\":\"s-new\",\"message_count\":4,\"is_new_conversation\":false}\n",
            ])
            .with_history(history.clone()),
        );

        chat.send("hi").await.unwrap();
        assert_eq!(transport.history_calls.load(Ordering::SeqCst), 1);
        let view = chat.snapshot();
        assert_eq!(view.messages, history);
        assert_eq!(view.session.unwrap().message_count, 4);
    }

    #[tokio::test]
    async fn switching_to_a_conversation_fetches_history_exactly_once() {
        let history = vec![Message::user("q1"), Message::assistant("a1")];
        let (chat, transport) = session(FakeTransport::default().with_history(history.clone()));

        let mut views = chat.subscribe();
        chat.switch_session(SessionId::new("s-7")).await.unwrap();

        assert_eq!(transport.history_calls.load(Ordering::SeqCst), 1);
        let view = views.borrow_and_update().clone();
        assert_eq!(view.messages, history);
        assert_eq!(view.phase, ChatPhase::Idle);
        assert_eq!(view.session.unwrap().session_id.as_str(), "s-7");
    }

    #[tokio::test]
    async fn new_conversation_requests_a_fresh_session() {
        struct Recording {
            seen: Mutex<Vec<ChatRequest>>,
        }

        #[async_trait]
        impl ChatTransport for Recording {
            async fn open_chat_stream(&self, req: &ChatRequest) -> Result<ByteStream, TransportError> {
                self.seen.lock().unwrap().push(req.clone());
                Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                    b"{\"type\":\"complete\",\"full_response\":\"ok\",\"session_id\":\"s2\"}\n".to_vec(),
                )])))
            }
            async fn send_chat(&self, _req: &ChatRequest) -> Result<ChatReply, TransportError> {
                Err(TransportError::Network("unused".into()))
            }
            async fn load_history(&self, _s: &SessionId) -> Result<Vec<Message>, TransportError> {
                Ok(vec![])
            }
        }

        let transport = Arc::new(Recording {
            seen: Mutex::new(vec![]),
        });
        let chat = ChatSession::new(transport.clone(), ChatOptions::default());
        chat.new_conversation().unwrap();
        chat.send("first").await.unwrap();
        chat.send("second").await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].start_new_conversation, Some(true));
        assert_eq!(seen[0].session_id, None);
        assert_eq!(seen[1].start_new_conversation, None);
        assert_eq!(seen[1].session_id, Some(SessionId::new("s2")));
    }

    #[tokio::test]
    async fn completion_in_a_later_chunk_supplies_text_and_session() {
        let (chat, transport) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"content\",\"content\":\"Hi th\",\"done\":true}\n",
            "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Hi there!\",\"session_id\":\"s-new\",\"message_count\":2,\"is_new_conversation\":true}\n",
        ]));

        assert_eq!(chat.send("hello").await.unwrap(), SendOutcome::Streamed);
        let view = chat.snapshot();
        assert_eq!(assistant_texts(&view), vec!["Hi there!"]);
        assert_eq!(view.session.unwrap().session_id.as_str(), "s-new");
        assert_eq!(transport.history_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_from_a_repeated_completion_is_adopted() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Answer\"}\n",
            "data: {\"type\":\"complete\",\"done\":true,\"full_response\":\"Answer\",\"session_id\":\"s-9\",\"message_count\":2}\n",
        ]));

        chat.send("q").await.unwrap();
        let view = chat.snapshot();
        assert_eq!(assistant_texts(&view), vec!["Answer"]);
        assert_eq!(view.session.unwrap().session_id.as_str(), "s-9");
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stream_after_completion_still_commits() {
        struct OpenEnded;

        #[async_trait]
        impl ChatTransport for OpenEnded {
            async fn open_chat_stream(&self, _req: &ChatRequest) -> Result<ByteStream, TransportError> {
                let head = futures_util::stream::iter(vec![Ok(
                    b"data: {\"type\":\"complete\",\"full_response\":\"done\"}\n".to_vec(),
                )]);
                Ok(Box::pin(head.chain(futures_util::stream::pending())))
            }
            async fn send_chat(&self, _req: &ChatRequest) -> Result<ChatReply, TransportError> {
                Err(TransportError::Network("unused".into()))
            }
            async fn load_history(&self, _s: &SessionId) -> Result<Vec<Message>, TransportError> {
                Ok(vec![])
            }
        }

        let chat = ChatSession::new(
            Arc::new(OpenEnded),
            ChatOptions {
                stream_idle_timeout: Some(Duration::from_secs(5)),
            },
        );
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Streamed);
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["done"]);
    }

    #[tokio::test]
    async fn reset_after_completion_keeps_the_reply() {
        let transport = FakeTransport {
            stream_chunks: Mutex::new(Some(vec![
                Ok(b"data: {\"type\":\"complete\",\"full_response\":\"kept\"}\n".to_vec()),
                Err(TransportError::Network("reset".into())),
            ])),
            ..Default::default()
        };
        let (chat, transport) = session(transport);
        assert_eq!(chat.send("q").await.unwrap(), SendOutcome::Streamed);
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["kept"]);
        assert_eq!(transport.fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn server_text_is_committed_verbatim() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "data: {\"type\":\"complete\",\"full_response\":\"    let x = 1;\\n\"}\n",
        ]));
        chat.send("code please").await.unwrap();
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["    let x = 1;\n"]);
    }

    #[tokio::test]
    async fn plain_lines_survive_alongside_deltas() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "intro line\n",
            "data: {\"type\":\"content\",\"content\":\"more\"}\n",
            "data: {\"type\":\"complete\",\"done\":true}\n",
        ]));
        chat.send("q").await.unwrap();
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["intro line\nmore"]);
    }

    #[tokio::test]
    async fn send_waits_for_a_pending_switch() {
        struct SlowHistory {
            release: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
        }

        #[async_trait]
        impl ChatTransport for SlowHistory {
            async fn open_chat_stream(&self, _req: &ChatRequest) -> Result<ByteStream, TransportError> {
                Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                    b"data: {\"type\":\"complete\",\"full_response\":\"a2\"}\n".to_vec(),
                )])))
            }
            async fn send_chat(&self, _req: &ChatRequest) -> Result<ChatReply, TransportError> {
                Err(TransportError::Network("unused".into()))
            }
            async fn load_history(&self, _s: &SessionId) -> Result<Vec<Message>, TransportError> {
                if let Some(rx) = self.release.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(vec![Message::user("q1"), Message::assistant("a1")])
            }
        }

        let (release_tx, release_rx) = tokio::sync::oneshot::channel();
        let chat = ChatSession::new(
            Arc::new(SlowHistory {
                release: tokio::sync::Mutex::new(Some(release_rx)),
            }),
            ChatOptions::default(),
        );

        let switch = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.switch_session(SessionId::new("s-7")).await })
        };
        let mut views = chat.subscribe();
        views
            .wait_for(|v| v.phase == ChatPhase::Loading)
            .await
            .unwrap();

        assert_eq!(chat.send("q2").await, Err(ChatError::SendInFlight));
        release_tx.send(()).unwrap();
        switch.await.unwrap().unwrap();

        assert_eq!(chat.send("q2").await.unwrap(), SendOutcome::Streamed);
        let contents: Vec<_> = chat
            .snapshot()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn plain_text_lines_are_kept_but_json_debris_is_dropped() {
        let (chat, _) = session(FakeTransport::streaming(&[
            "plain words\n",
            "{\"type\":\"content\",\"content\":\"trunc\n",
        ]));
        chat.send("q").await.unwrap();
        assert_eq!(assistant_texts(&chat.snapshot()), vec!["plain words"]);
    }
}
