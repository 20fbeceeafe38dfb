//! Chat session controller: the state behind the floating chat widget.
//!
//! Owns the conversation store and UI-visible state (open/closed, attendance mode,
//! loading, visitor identity), dispatches visitor messages to the backend selected by
//! the attendance mode, and turns replies into display cards. Every failure ends as a
//! message in the conversation; nothing is retried automatically.
//!
//! Replies are tagged with the store generation when the request is issued and are
//! dropped if the conversation was cleared before they arrived.

use crate::config::{ChatConfig, ChatTexts};
use crate::layout::{self, MessageView};
use crate::normalize::{self, NormalizeError};
use crate::poller::{Backoff, InboxDelivery, InboxPoller};
use crate::split::split_long_message;
use crate::store::{Message, MessageStore};
use crate::webhook::{
    BotRequest, ChatBackend, Notification, NotificationKind, WebhookClient, WebhookError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Who answers the visitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMode {
    #[default]
    Automated,
    Human,
}

/// Visitor name and email, forwarded with every webhook call when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0} is not configured")]
    ConfigMissing(&'static str),
    #[error("network failure: {0}")]
    Network(WebhookError),
    #[error("malformed payload: {0}")]
    MalformedPayload(serde_json::Error),
    #[error("no text found in reply")]
    NoTextFound,
}

impl From<WebhookError> for ChatError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::NotConfigured(what) => ChatError::ConfigMissing(what),
            other => ChatError::Network(other),
        }
    }
}

impl From<NormalizeError> for ChatError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::MalformedPayload(e) => ChatError::MalformedPayload(e),
            NormalizeError::NoTextFound => ChatError::NoTextFound,
        }
    }
}

impl ChatError {
    /// Bot message shown in place of a reply.
    pub fn user_message<'a>(&self, texts: &'a ChatTexts) -> &'a str {
        match self {
            ChatError::ConfigMissing(_) => &texts.not_configured,
            ChatError::NoTextFound => &texts.no_text,
            ChatError::Network(_) | ChatError::MalformedPayload(_) => &texts.apology,
        }
    }
}

/// What a call to [`ChatSession::send`] did.
#[derive(Debug)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Empty,
    /// Another send is in flight; nothing happened.
    Busy,
    /// No automated webhook; a "not configured" message was appended.
    NotConfigured,
    /// The reply was appended as `cards` messages.
    Replied { cards: usize },
    /// Human mode: the operator side accepted the message; the reply comes through the inbox.
    Acknowledged,
    /// The text asked for a human; see [`ChatSession::request_human`].
    Handoff(Result<(), ChatError>),
    /// The conversation was cleared while waiting; the reply was dropped.
    Discarded,
    /// The call failed; a fallback message was appended.
    Failed(ChatError),
}

/// Change notifications for whoever draws the widget.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Appended(Vec<Message>),
    Cleared,
    /// A reply arrived while the chat was closed.
    NotificationSound,
    ModeChanged(AttendanceMode),
    Loading(bool),
}

/// Canned question offered before the first interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuickAction {
    pub id: &'static str,
    pub label: &'static str,
    pub prompt: &'static str,
}

pub const QUICK_ACTIONS: &[QuickAction] = &[
    QuickAction {
        id: "q1",
        label: "Como registrar minha marca?",
        prompt: "Como faço para registrar minha marca?",
    },
    QuickAction {
        id: "q2",
        label: "Quanto custa?",
        prompt: "Quanto custa o registro de marca?",
    },
    QuickAction {
        id: "q3",
        label: "Quanto tempo demora?",
        prompt: "Quanto tempo demora o processo de registro?",
    },
    QuickAction {
        id: "q4",
        label: "Falar com humano",
        prompt: "Gostaria de falar com um atendente humano.",
    },
];

/// True if `text` contains one of `phrases`, ignoring case.
pub fn is_handoff_request(text: &str, phrases: &[String]) -> bool {
    let text = text.to_lowercase();
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .any(|p| !p.is_empty() && text.contains(&p))
}

#[derive(Debug, Default)]
struct State {
    open: bool,
    mode: AttendanceMode,
    identity: Option<UserIdentity>,
    interacted: bool,
}

struct Shared {
    config: ChatConfig,
    backend: Arc<dyn ChatBackend>,
    store: MessageStore,
    state: RwLock<State>,
    loading: AtomicBool,
    user_id: String,
    last_inbox_id: Mutex<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn notification(&self, kind: NotificationKind, message: &str) -> Notification {
        let state = self.state.read().await;
        let identity = state.identity.clone().unwrap_or_default();
        Notification {
            kind,
            message: message.to_string(),
            user_id: self.user_id.clone(),
            user_name: identity.name,
            user_email: identity.email,
            timestamp: Utc::now(),
            is_human_attendance: state.mode == AttendanceMode::Human,
            extra: serde_json::Map::new(),
        }
    }

    /// Append bot messages built from `cards` unless the store moved past `generation`.
    async fn append_bot(&self, generation: u64, cards: Vec<String>) -> bool {
        let state = self.state.read().await;
        let messages = Message::bot_series(cards, state.open);
        if !self.store.append_if_current(generation, messages.clone()).await {
            log::debug!("chat: dropping reply issued before the conversation was cleared");
            return false;
        }
        self.emit(SessionEvent::Appended(messages));
        if !state.open {
            self.emit(SessionEvent::NotificationSound);
        }
        true
    }

    async fn append_text(&self, generation: u64, text: &str) -> bool {
        self.append_bot(generation, vec![text.to_string()]).await
    }

    /// Operator reply from the inbox. Dropped once the session is back in automated mode,
    /// or when the conversation was cleared after the poll that fetched it was issued.
    async fn deliver_inbox(&self, delivery: InboxDelivery) -> bool {
        if self.state.read().await.mode != AttendanceMode::Human {
            log::debug!("chat: dropping operator reply received after leaving human mode");
            return false;
        }
        let m = delivery.message;
        let cards = split_long_message(&m.message, self.config.card_char_limit);
        if !self.append_bot(delivery.generation, cards).await {
            return false;
        }
        *self.last_inbox_id.lock().await = Some(m.message_id);
        true
    }
}

/// Resets the loading flag when a send finishes or is cancelled.
struct LoadingGuard<'a>(&'a Shared);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.loading.store(false, Ordering::SeqCst);
        self.0.emit(SessionEvent::Loading(false));
    }
}

/// Inbox poll loop plus the task appending what it fetches.
struct Polling {
    poller: InboxPoller,
    delivery: JoinHandle<()>,
}

/// One visitor's chat session.
pub struct ChatSession {
    shared: Arc<Shared>,
    polling: Mutex<Option<Polling>>,
}

impl ChatSession {
    /// Session starting with the greeting, closed, in automated mode.
    pub fn new(config: ChatConfig, backend: Arc<dyn ChatBackend>) -> Self {
        let greeting = Message::bot(config.greeting_text.clone(), true);
        let (events, _) = broadcast::channel(64);
        let user_id = format!("visitor-{}", uuid::Uuid::new_v4());
        if !backend.has_bot() {
            log::warn!("chat: automated webhook url is not configured; sends are blocked");
        }
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                store: MessageStore::with_messages(vec![greeting]),
                state: RwLock::new(State::default()),
                loading: AtomicBool::new(false),
                user_id,
                last_inbox_id: Mutex::new(None),
                events,
            }),
            polling: Mutex::new(None),
        }
    }

    /// Session talking to the webhooks named in `config` over HTTP.
    pub fn with_webhooks(config: ChatConfig) -> Self {
        let backend = Arc::new(WebhookClient::from_config(&config));
        Self::new(config, backend)
    }

    pub fn config(&self) -> &ChatConfig {
        &self.shared.config
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    /// Persistent warning while the automated webhook is missing.
    pub fn config_warning(&self) -> Option<&str> {
        if self.shared.backend.has_bot() {
            None
        } else {
            Some(&self.shared.config.texts.config_warning)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.shared.store.messages().await
    }

    pub async fn unread_count(&self) -> usize {
        self.shared.store.unread_count().await
    }

    pub async fn badge_label(&self) -> Option<String> {
        layout::badge_label(self.unread_count().await)
    }

    /// Display layout of the whole conversation.
    pub async fn layout(&self) -> Vec<MessageView> {
        layout::layout(&self.messages().await, self.is_loading())
    }

    pub async fn mode(&self) -> AttendanceMode {
        self.shared.state.read().await.mode
    }

    pub async fn is_open(&self) -> bool {
        self.shared.state.read().await.open
    }

    pub fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::SeqCst)
    }

    pub async fn set_user_identity(&self, identity: UserIdentity) {
        self.shared.state.write().await.identity = Some(identity);
    }

    /// Open the widget; everything becomes read.
    pub async fn open(&self) {
        let mut state = self.shared.state.write().await;
        state.open = true;
        self.shared.store.mark_all_read().await;
    }

    pub async fn close(&self) {
        self.shared.state.write().await.open = false;
    }

    /// Flip open/closed; returns the new value.
    pub async fn toggle(&self) -> bool {
        if self.is_open().await {
            self.close().await;
            false
        } else {
            self.open().await;
            true
        }
    }

    /// Reset the conversation to the greeting. Replies still in flight are dropped.
    pub async fn clear(&self) {
        let greeting = Message::bot(self.shared.config.greeting_text.clone(), true);
        self.shared.store.clear(greeting).await;
        self.shared.emit(SessionEvent::Cleared);
    }

    /// Quick actions to show: only before the first interaction, on a fresh conversation.
    pub async fn quick_actions(&self) -> &'static [QuickAction] {
        let interacted = self.shared.state.read().await.interacted;
        if interacted || self.shared.store.len().await >= 2 {
            &[]
        } else {
            QUICK_ACTIONS
        }
    }

    /// Send the prompt of quick action `id`. None if the id is unknown.
    pub async fn run_quick_action(&self, id: &str) -> Option<SendOutcome> {
        let action = QUICK_ACTIONS.iter().find(|a| a.id == id)?;
        Some(self.send(action.prompt).await)
    }

    /// Send a visitor message. The message is appended right away; the reply (or a
    /// fallback message) follows when the backend answers.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Empty;
        }
        if self
            .shared
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SendOutcome::Busy;
        }
        self.shared.emit(SessionEvent::Loading(true));
        let _guard = LoadingGuard(&self.shared);

        let mode = self.mode().await;
        if mode == AttendanceMode::Automated && !self.shared.backend.has_bot() {
            let generation = self.shared.store.generation().await;
            self.shared
                .append_text(generation, &self.shared.config.texts.not_configured)
                .await;
            return SendOutcome::NotConfigured;
        }

        self.shared.state.write().await.interacted = true;
        let user_message = Message::user(text);
        self.shared.store.append(user_message.clone()).await;
        self.shared.emit(SessionEvent::Appended(vec![user_message]));

        if mode == AttendanceMode::Automated
            && is_handoff_request(text, &self.shared.config.handoff_phrases)
        {
            return SendOutcome::Handoff(self.handoff(text).await);
        }

        match mode {
            AttendanceMode::Automated => self.ask_bot(text).await,
            AttendanceMode::Human => self.message_operator(text).await,
        }
    }

    async fn ask_bot(&self, text: &str) -> SendOutcome {
        let shared = &self.shared;
        let generation = shared.store.generation().await;
        let identity = shared.state.read().await.identity.clone().unwrap_or_default();
        let request = BotRequest {
            message: text.to_string(),
            user_id: shared.user_id.clone(),
            user_name: identity.name,
            user_email: identity.email,
            timestamp: Utc::now(),
        };
        let reply = match shared.backend.ask_bot(&request).await {
            Ok(body) => normalize::normalize_body(&body).map_err(ChatError::from),
            Err(e) => Err(ChatError::from(e)),
        };
        match reply {
            Ok(reply) => {
                let cards = split_long_message(&reply, shared.config.card_char_limit);
                let count = cards.len();
                if !shared.append_bot(generation, cards).await {
                    return SendOutcome::Discarded;
                }
                if shared.config.mirror_bot_messages {
                    self.mirror_reply(reply).await;
                }
                SendOutcome::Replied { cards: count }
            }
            Err(e) => {
                log::warn!("chat: automated reply failed: {}", e);
                shared
                    .append_text(generation, e.user_message(&shared.config.texts))
                    .await;
                SendOutcome::Failed(e)
            }
        }
    }

    /// Human mode: forward to the operator side. A reply body with recognizable text is
    /// shown; otherwise the operator's answer arrives through the inbox.
    async fn message_operator(&self, text: &str) -> SendOutcome {
        let shared = &self.shared;
        let generation = shared.store.generation().await;
        let notification = shared
            .notification(NotificationKind::HumanMessage, text)
            .await;
        match shared.backend.notify(&notification).await {
            Ok(body) => {
                let ack = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| normalize::probe_text(&v).map(str::to_string));
                match ack {
                    Some(ack) => {
                        let cards = split_long_message(&ack, shared.config.card_char_limit);
                        let count = cards.len();
                        if shared.append_bot(generation, cards).await {
                            SendOutcome::Replied { cards: count }
                        } else {
                            SendOutcome::Discarded
                        }
                    }
                    None => SendOutcome::Acknowledged,
                }
            }
            Err(e) => {
                let e = ChatError::from(e);
                log::warn!("chat: human-mode message failed: {}", e);
                shared
                    .append_text(generation, e.user_message(&shared.config.texts))
                    .await;
                SendOutcome::Failed(e)
            }
        }
    }

    async fn mirror_reply(&self, reply: String) {
        let notification = self
            .shared
            .notification(NotificationKind::BotMessage, &reply)
            .await;
        let backend = self.shared.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.notify(&notification).await {
                log::debug!("chat: mirroring bot reply failed: {}", e);
            }
        });
    }

    /// Switch to a human operator (the "talk to a human" action).
    pub async fn request_human(&self) -> Result<(), ChatError> {
        self.shared.state.write().await.interacted = true;
        self.handoff("Visitante solicitou atendimento humano.").await
    }

    async fn handoff(&self, text: &str) -> Result<(), ChatError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.write().await;
            if state.mode == AttendanceMode::Human {
                return Ok(());
            }
            state.mode = AttendanceMode::Human;
        }
        shared.emit(SessionEvent::ModeChanged(AttendanceMode::Human));
        let generation = shared.store.generation().await;
        let notification = shared
            .notification(NotificationKind::HumanRequested, text)
            .await;
        match shared.backend.notify(&notification).await {
            Ok(_) => {
                log::info!("chat: handoff requested for {}", shared.user_id);
                shared
                    .append_text(generation, &shared.config.texts.handoff_confirmation)
                    .await;
                self.start_polling().await;
                Ok(())
            }
            Err(e) => {
                let e = ChatError::from(e);
                log::warn!("chat: handoff request failed, staying automated: {}", e);
                shared.state.write().await.mode = AttendanceMode::Automated;
                shared.emit(SessionEvent::ModeChanged(AttendanceMode::Automated));
                shared
                    .append_text(generation, &shared.config.texts.handoff_failed)
                    .await;
                Err(e)
            }
        }
    }

    /// Go back to the automated assistant. Returns false if already automated.
    pub async fn return_to_automated(&self) -> bool {
        let shared = &self.shared;
        {
            let mut state = shared.state.write().await;
            if state.mode == AttendanceMode::Automated {
                return false;
            }
            state.mode = AttendanceMode::Automated;
        }
        self.stop_polling().await;
        shared.emit(SessionEvent::ModeChanged(AttendanceMode::Automated));

        let mut notification = shared
            .notification(NotificationKind::ModeChanged, "automated")
            .await;
        notification
            .extra
            .insert("previousMode".to_string(), serde_json::json!("human"));
        if let Err(e) = shared.backend.notify(&notification).await {
            log::warn!("chat: mode change notification failed: {}", e);
        }
        if let Err(e) = shared.backend.notify_bot(&notification).await {
            log::warn!("chat: mode change notice to automated webhook failed: {}", e);
        }
        let generation = shared.store.generation().await;
        shared
            .append_text(generation, &shared.config.texts.automated_resumed)
            .await;
        true
    }

    /// Set the attendance mode; a switch to human goes through the handoff request.
    pub async fn set_mode(&self, mode: AttendanceMode) -> Result<(), ChatError> {
        match mode {
            AttendanceMode::Human => self.request_human().await,
            AttendanceMode::Automated => {
                self.return_to_automated().await;
                Ok(())
            }
        }
    }

    async fn start_polling(&self) {
        let shared = &self.shared;
        if !shared.backend.has_inbox() {
            log::warn!("chat: no inbox url configured; operator replies will not be fetched");
            return;
        }
        let (tx, mut rx) = mpsc::channel(32);
        let backoff = Backoff::new(
            Duration::from_millis(shared.config.poll_interval_ms),
            Duration::from_millis(shared.config.poll_max_interval_ms),
        );
        let last_id = shared.last_inbox_id.lock().await.clone();
        let poller = InboxPoller::start(
            shared.backend.clone(),
            shared.user_id.clone(),
            last_id,
            backoff,
            shared.store.clone(),
            tx,
        );
        let receiver = self.shared.clone();
        let delivery = tokio::spawn(async move {
            while let Some(d) = rx.recv().await {
                receiver.deliver_inbox(d).await;
            }
        });
        *self.polling.lock().await = Some(Polling { poller, delivery });
    }

    /// Stop the poll loop and drop anything it fetched but has not appended yet.
    async fn stop_polling(&self) {
        if let Some(polling) = self.polling.lock().await.take() {
            polling.poller.stop();
            polling.delivery.abort();
        }
    }

    /// True while the human-mode poller runs.
    pub async fn is_polling(&self) -> bool {
        self.polling
            .lock()
            .await
            .as_ref()
            .map(|p| p.poller.is_running())
            .unwrap_or(false)
    }

    /// Stop background work (the inbox poller).
    pub async fn shutdown(&self) {
        self.stop_polling().await;
    }
}
