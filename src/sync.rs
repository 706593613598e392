use crate::assembler::ChunkSink;
use crate::constants::{
    OFFLINE_NOTICE, TITLE_REFRESH_HIGH_EFFORT, TITLE_REFRESH_SAFETY_NET, TITLE_REFRESH_STANDARD,
};
use crate::offline::{OfflineQueue, QueuedAction};
use crate::pipeline::ChatPipeline;
use crate::request::StreamRequest;
use crate::transport::Transport;
use crate::types::*;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
}

/// Source of the session list, refreshed to pick up generated titles.
pub trait SessionDirectory: Send + Sync {
    fn refresh_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionSummary>>>;
}

/// Where terminal errors are surfaced to the user.
pub trait Notifier: Send + Sync {
    fn notify_error(&self, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_error(&self, message: &str) {
        tracing::warn!(target: "notifications", "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleRefreshPolicy {
    pub standard: Duration,
    pub high_effort: Duration,
    pub safety_net: Duration,
}

impl Default for TitleRefreshPolicy {
    fn default() -> Self {
        Self {
            standard: TITLE_REFRESH_STANDARD,
            high_effort: TITLE_REFRESH_HIGH_EFFORT,
            safety_net: TITLE_REFRESH_SAFETY_NET,
        }
    }
}

impl TitleRefreshPolicy {
    /// High-effort modes generate titles slowly; they get a later first
    /// refresh and a second one.
    pub fn delays_for(&self, mode: RequestMode) -> Vec<Duration> {
        if mode.is_high_effort() {
            vec![self.high_effort, self.safety_net]
        } else {
            vec![self.standard]
        }
    }
}

/// Client-held messages, per session. Updates always address a message by id.
#[derive(Debug, Default, Clone)]
pub struct ConversationState {
    sessions: HashMap<SessionId, Vec<ChatMessage>>,
}

impl ConversationState {
    pub fn messages(&self, session_id: &SessionId) -> &[ChatMessage] {
        self.sessions
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.sessions
            .entry(message.session_id.clone())
            .or_default()
            .push(message);
    }

    pub fn find(&self, session_id: &SessionId, id: &MessageId) -> Option<&ChatMessage> {
        self.messages(session_id).iter().find(|m| &m.id == id)
    }

    /// Applies `update` to the message with `id`; false if it is gone.
    pub fn update_message<F>(&mut self, session_id: &SessionId, id: &MessageId, update: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        let message = self
            .sessions
            .get_mut(session_id)
            .and_then(|messages| messages.iter_mut().find(|m| &m.id == id));
        match message {
            Some(message) => {
                update(message);
                true
            }
            None => {
                tracing::debug!("[SYNC] Message {} no longer present in {}", id, session_id);
                false
            }
        }
    }

    pub fn replace_message(
        &mut self,
        session_id: &SessionId,
        id: &MessageId,
        replacement: ChatMessage,
    ) -> bool {
        self.update_message(session_id, id, |message| *message = replacement)
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    Delivered(ChatMessage),
    /// The request never left the device; it waits in the offline queue.
    Queued(QueuedAction),
}

/// Streams fragments into the placeholder message, then on to the caller.
struct PlaceholderSink<'a> {
    state: Arc<Mutex<ConversationState>>,
    session_id: SessionId,
    placeholder_id: MessageId,
    observer: &'a mut dyn ChunkSink,
}

impl PlaceholderSink<'_> {
    fn update<F: FnOnce(&mut ChatMessage)>(&self, update: F) {
        if let Ok(mut state) = self.state.lock() {
            state.update_message(&self.session_id, &self.placeholder_id, update);
        }
    }
}

impl ChunkSink for PlaceholderSink<'_> {
    fn on_chunk(&mut self, fragment: &str) {
        self.update(|message| message.content.push_str(fragment));
        self.observer.on_chunk(fragment);
    }

    fn on_retry(&mut self, attempt: u32) {
        tracing::debug!("[SYNC] Clearing placeholder before retry {}", attempt);
        self.update(|message| message.content.clear());
        self.observer.on_retry(attempt);
    }
}

/// Merges pipeline results into conversation state.
pub struct ConversationSync {
    state: Arc<Mutex<ConversationState>>,
    offline: Arc<dyn OfflineQueue>,
    sessions: Arc<dyn SessionDirectory>,
    notifier: Arc<dyn Notifier>,
    title_refresh: TitleRefreshPolicy,
    refresh_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConversationSync {
    pub fn new(
        offline: Arc<dyn OfflineQueue>,
        sessions: Arc<dyn SessionDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConversationState::default())),
            offline,
            sessions,
            notifier,
            title_refresh: TitleRefreshPolicy::default(),
            refresh_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_title_refresh(mut self, policy: TitleRefreshPolicy) -> Self {
        self.title_refresh = policy;
        self
    }

    pub fn snapshot(&self) -> ConversationState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self, session_id: &SessionId) -> Vec<ChatMessage> {
        self.snapshot().messages(session_id).to_vec()
    }

    /// Sends one user message: optimistic insert, live streaming into a
    /// placeholder, then replacement by id with the final reply or an
    /// error text.
    pub async fn send<T: Transport>(
        &self,
        pipeline: &ChatPipeline<T>,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome> {
        self.send_observed(pipeline, request, &mut |_: &str| {}, cancel)
            .await
    }

    /// Like [`send`](Self::send), additionally forwarding live fragments to
    /// `observer`.
    pub async fn send_observed<T: Transport>(
        &self,
        pipeline: &ChatPipeline<T>,
        request: StreamRequest,
        observer: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome> {
        let session_id = request.session_id.clone();
        let placeholder_id = MessageId::placeholder();
        let first_exchange = self.insert_optimistic(&request, &placeholder_id);

        let mut sink = PlaceholderSink {
            state: self.state.clone(),
            session_id: session_id.clone(),
            placeholder_id: placeholder_id.clone(),
            observer,
        };

        match pipeline.send_message(&request, &mut sink, cancel).await {
            Ok(message) => {
                self.with_state(|state| {
                    state.replace_message(&session_id, &placeholder_id, message.clone());
                });
                if first_exchange {
                    self.schedule_title_refresh(request.mode);
                }
                Ok(SendOutcome::Delivered(message))
            }
            Err(err) if err.inner.is_preflight() => {
                tracing::warn!("[SYNC] Backend unreachable, queueing message: {}", err.inner);
                let action = QueuedAction::send_message(&request);
                self.offline.enqueue(action.clone()).await?;
                self.set_placeholder_text(&session_id, &placeholder_id, OFFLINE_NOTICE);
                Ok(SendOutcome::Queued(action))
            }
            Err(err) => {
                let text = err.inner.user_message();
                self.set_placeholder_text(&session_id, &placeholder_id, &text);
                if !matches!(err.inner, ChatError::Cancelled) {
                    self.notifier.notify_error(&text);
                }
                Err(err)
            }
        }
    }

    /// Waits for scheduled session-list refreshes to finish.
    pub async fn wait_for_title_refresh(&self) {
        let handles = self
            .refresh_tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("[SYNC] Title refresh task failed: {}", e);
            }
        }
    }

    /// Inserts the user message and the placeholder. Returns true when the
    /// session had no messages before.
    fn insert_optimistic(&self, request: &StreamRequest, placeholder_id: &MessageId) -> bool {
        let mut user = ChatMessage::user(request.session_id.clone(), request.content.clone());
        if request.mode == RequestMode::CodeSearch {
            user.metadata = Some(MessageMetadata {
                code_search: true,
                ..MessageMetadata::default()
            });
        }
        let mut placeholder =
            ChatMessage::assistant(placeholder_id.clone(), request.session_id.clone(), "");
        placeholder.metadata = Some(MessageMetadata {
            deep_reasoning: request.mode == RequestMode::DeepReasoning,
            maximal_effort: request.mode == RequestMode::MaximalEffort,
            code_search: request.mode == RequestMode::CodeSearch,
            ..MessageMetadata::default()
        });

        let mut first_exchange = false;
        self.with_state(|state| {
            first_exchange = state.messages(&request.session_id).is_empty();
            state.push(user);
            state.push(placeholder);
        });
        first_exchange
    }

    fn set_placeholder_text(&self, session_id: &SessionId, placeholder_id: &MessageId, text: &str) {
        self.with_state(|state| {
            state.update_message(session_id, placeholder_id, |message| {
                message.content = text.to_string();
            });
        });
    }

    fn with_state<F: FnOnce(&mut ConversationState)>(&self, update: F) {
        match self.state.lock() {
            Ok(mut state) => update(&mut state),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }

    fn schedule_title_refresh(&self, mode: RequestMode) {
        let delays = self.title_refresh.delays_for(mode);
        let mut handles = Vec::with_capacity(delays.len());
        for delay in delays {
            let sessions = self.sessions.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match sessions.refresh_sessions().await {
                    Ok(list) => tracing::info!(
                        "[SYNC] Session list refreshed after {:?} ({} sessions)",
                        delay,
                        list.len()
                    ),
                    Err(e) => tracing::warn!("[SYNC] Session list refresh failed: {}", e.inner),
                }
            }));
        }
        if let Ok(mut tasks) = self.refresh_tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.extend(handles);
        }
    }
}
