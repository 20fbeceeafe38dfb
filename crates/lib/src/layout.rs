//! Display layout for the conversation: series grouping, badge label, feedback placement.

use crate::format;
use crate::store::{Message, Sender};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How one message is drawn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub html: String,
    pub timestamp: DateTime<Utc>,
    /// Avatar next to the bubble: first and last card of a series, every standalone message.
    pub show_avatar: bool,
    /// Timestamp under the bubble: last card of a series, every standalone message.
    pub show_timestamp: bool,
    /// Continues the previous message's series (reduced spacing, squared corner).
    pub compact: bool,
    /// Thumbs up/down under the final bot reply.
    pub show_feedback: bool,
}

fn same_series(a: &Message, b: &Message) -> bool {
    a.series_id.is_some() && a.series_id == b.series_id
}

/// Lay out `messages` in order. `loading` hides the feedback buttons while a reply is pending.
pub fn layout(messages: &[Message], loading: bool) -> Vec<MessageView> {
    let last = messages.len().saturating_sub(1);
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let continues_prev = i > 0 && same_series(&messages[i - 1], m);
            let continues_next = i < last && same_series(m, &messages[i + 1]);
            MessageView {
                id: m.id.clone(),
                sender: m.sender,
                text: m.text.clone(),
                html: format::to_html(&m.text),
                timestamp: m.timestamp,
                show_avatar: !continues_prev || !continues_next,
                show_timestamp: !continues_next,
                compact: continues_prev,
                show_feedback: i == last && m.is_bot() && !loading,
            }
        })
        .collect()
}

/// Launcher badge text: nothing for zero, "9+" above nine.
pub fn badge_label(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        1..=9 => Some(unread.to_string()),
        _ => Some("9+".to_string()),
    }
}
