//! Conversation message store for the chat widget.
//!
//! Messages are kept in display order and are never removed individually; the only
//! destructive operation is `clear`, which resets the store to a single greeting and
//! advances the store generation so late replies issued before the clear are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A single message in the conversation. Only `is_read` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    /// Shared by every card split from one reply; absent for single-card replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Timestamp-based id, unique within the process.
fn next_message_id(at: DateTime<Utc>) -> String {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", at.timestamp_millis(), seq)
}

impl Message {
    /// Message typed by the visitor (always read).
    pub fn user(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: next_message_id(now),
            text: text.into(),
            sender: Sender::User,
            timestamp: now,
            is_read: true,
            series_id: None,
        }
    }

    /// Bot message; `is_read` should be true only when the chat is open.
    pub fn bot(text: impl Into<String>, is_read: bool) -> Self {
        let now = Utc::now();
        Self {
            id: next_message_id(now),
            text: text.into(),
            sender: Sender::Bot,
            timestamp: now,
            is_read,
            series_id: None,
        }
    }

    /// Bot messages for the cards of one reply. More than one card => shared series id.
    pub fn bot_series(cards: Vec<String>, is_read: bool) -> Vec<Self> {
        if cards.len() <= 1 {
            return cards.into_iter().map(|c| Self::bot(c, is_read)).collect();
        }
        let series_id = format!("series-{}", uuid::Uuid::new_v4());
        let now = Utc::now();
        cards
            .into_iter()
            .enumerate()
            .map(|(i, text)| Self {
                id: format!("{}-{}", series_id, i),
                text,
                sender: Sender::Bot,
                // Keeps cards strictly ordered by timestamp as well as position.
                timestamp: now + chrono::Duration::milliseconds(i as i64),
                is_read,
                series_id: Some(series_id.clone()),
            })
            .collect()
    }

    pub fn is_bot(&self) -> bool {
        self.sender == Sender::Bot
    }
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<Message>,
    generation: u64,
}

/// In-memory store shared by the send path and the inbox poller.
#[derive(Clone, Default)]
pub struct MessageStore {
    inner: Arc<RwLock<Inner>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `messages` (e.g. the greeting).
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                messages,
                generation: 0,
            })),
        }
    }

    /// Append a message at the end (insertion order is display order).
    pub async fn append(&self, message: Message) {
        self.inner.write().await.messages.push(message);
    }

    /// Append `messages` only if no clear happened since `generation` was read.
    /// Returns false when the messages were dropped as stale.
    pub async fn append_if_current(&self, generation: u64, messages: Vec<Message>) -> bool {
        let mut g = self.inner.write().await;
        if g.generation != generation {
            return false;
        }
        g.messages.extend(messages);
        true
    }

    /// Replace the whole conversation with a single greeting and advance the generation.
    pub async fn clear(&self, greeting: Message) {
        let mut g = self.inner.write().await;
        g.messages.clear();
        g.messages.push(greeting);
        g.generation += 1;
    }

    /// Mark every message as read.
    pub async fn mark_all_read(&self) {
        let mut g = self.inner.write().await;
        for m in g.messages.iter_mut() {
            m.is_read = true;
        }
    }

    /// Current generation; compare with `append_if_current`.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Snapshot of all messages in display order.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.read().await.messages.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.messages.is_empty()
    }

    /// Number of bot messages not yet read.
    pub async fn unread_count(&self) -> usize {
        self.inner
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.is_bot() && !m.is_read)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_keeps_insertion_order() {
        let store = MessageStore::new();
        store.append(Message::bot("olá", true)).await;
        store.append(Message::user("quanto custa?")).await;
        let texts: Vec<String> = store.messages().await.into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["olá", "quanto custa?"]);
    }

    #[tokio::test]
    async fn clear_leaves_only_greeting_and_bumps_generation() {
        let store = MessageStore::new();
        for i in 0..5 {
            store.append(Message::user(format!("m{}", i))).await;
        }
        let before = store.generation().await;
        store.clear(Message::bot("greeting", true)).await;
        let messages = store.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "greeting");
        assert_eq!(store.generation().await, before + 1);
    }

    #[tokio::test]
    async fn stale_append_is_dropped() {
        let store = MessageStore::new();
        let generation = store.generation().await;
        store.clear(Message::bot("greeting", true)).await;
        let appended = store
            .append_if_current(generation, vec![Message::bot("late", false)])
            .await;
        assert!(!appended);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unread_counts_only_unread_bot_messages() {
        let store = MessageStore::new();
        store.append(Message::bot("a", false)).await;
        store.append(Message::bot("b", true)).await;
        store.append(Message::user("c")).await;
        store.append(Message::bot("d", false)).await;
        assert_eq!(store.unread_count().await, 2);
        store.mark_all_read().await;
        assert_eq!(store.unread_count().await, 0);
    }

    #[test]
    fn series_shares_id_and_orders_cards() {
        let cards = vec!["um".to_string(), "dois".to_string(), "três".to_string()];
        let messages = Message::bot_series(cards, false);
        assert_eq!(messages.len(), 3);
        let series = messages[0].series_id.clone().unwrap();
        assert!(messages.iter().all(|m| m.series_id.as_deref() == Some(series.as_str())));
        assert!(messages[0].timestamp < messages[2].timestamp);
        assert!(messages[1].id.ends_with("-1"));
    }

    #[test]
    fn single_card_has_no_series() {
        let messages = Message::bot_series(vec!["curta".to_string()], true);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].series_id.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let a = Message::user("x");
        let b = Message::user("x");
        assert_ne!(a.id, b.id);
    }
}
