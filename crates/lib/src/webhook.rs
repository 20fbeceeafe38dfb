//! Outbound webhook client: automated replies, operator notifications and inbox polling.
//!
//! All three endpoints take a JSON POST. Replies from the automated webhook are returned
//! as raw text; their shape is the normalizer's concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::ChatConfig;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook response could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Body sent to the automated webhook for each visitor message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRequest {
    pub message: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Notification kinds understood by the operator side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    HumanRequested,
    HumanMessage,
    BotMessage,
    ModeChanged,
}

/// Body sent to the notification webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_human_attendance: bool,
    /// Kind-specific fields, flattened into the body.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Body sent to the inbox endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxRequest {
    pub user_id: String,
    pub last_message_id: Option<String>,
    #[serde(rename = "type")]
    pub typ: String,
}

impl InboxRequest {
    pub fn new(user_id: impl Into<String>, last_message_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_message_id,
            typ: "CHECK_MESSAGES".to_string(),
        }
    }
}

/// One operator reply from the inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub message_id: String,
    pub message: String,
    pub timestamp: Option<String>,
}

/// Message id as sent by the backend: string or number.
fn id_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn inbox_message(v: &Value) -> Option<InboxMessage> {
    let message = v
        .get("message")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())?;
    Some(InboxMessage {
        message_id: id_string(v.get("messageId"))?,
        message: message.to_string(),
        timestamp: v.get("timestamp").and_then(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }),
    })
}

/// Parse an inbox response: `{messages: [...]}` or a single `{message, messageId, timestamp}`.
/// Entries without text or id are skipped.
pub fn parse_inbox(payload: &Value) -> Vec<InboxMessage> {
    if let Some(items) = payload.get("messages").and_then(Value::as_array) {
        return items.iter().filter_map(inbox_message).collect();
    }
    inbox_message(payload).into_iter().collect()
}

/// Outbound seam of the chat session. Implemented over HTTP by [`WebhookClient`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// POST a visitor message to the automated webhook; returns the raw response body.
    async fn ask_bot(&self, request: &BotRequest) -> Result<String, WebhookError>;

    /// POST a notification to the notification webhook; returns the raw response body.
    async fn notify(&self, notification: &Notification) -> Result<String, WebhookError>;

    /// POST a notification to the automated webhook (mode changes).
    async fn notify_bot(&self, notification: &Notification) -> Result<(), WebhookError>;

    /// Ask the inbox for operator replies newer than `request.last_message_id`.
    async fn check_inbox(&self, request: &InboxRequest) -> Result<Vec<InboxMessage>, WebhookError>;

    /// Whether the automated webhook is available (false => config warning).
    fn has_bot(&self) -> bool;

    /// Whether there is an inbox to poll in human mode.
    fn has_inbox(&self) -> bool {
        true
    }
}

/// reqwest-based client for the three webhook endpoints.
#[derive(Clone)]
pub struct WebhookClient {
    bot_url: Option<String>,
    notification_url: Option<String>,
    inbox_url: Option<String>,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(
        bot_url: Option<String>,
        notification_url: Option<String>,
        inbox_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("webhook: client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            bot_url,
            notification_url,
            inbox_url,
            client,
        }
    }

    /// Client for the URLs and timeout in `config` (env overrides already applied by the caller).
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(
            config.automated_webhook_url.clone(),
            config.notification_webhook_url.clone(),
            config.inbox_poll_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<String, WebhookError> {
        let res = self.client.post(url).json(body).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatBackend for WebhookClient {
    async fn ask_bot(&self, request: &BotRequest) -> Result<String, WebhookError> {
        let url = self
            .bot_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("automated webhook"))?;
        self.post(url, request).await
    }

    async fn notify(&self, notification: &Notification) -> Result<String, WebhookError> {
        let url = self
            .notification_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("notification webhook"))?;
        self.post(url, notification).await
    }

    async fn notify_bot(&self, notification: &Notification) -> Result<(), WebhookError> {
        let url = self
            .bot_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("automated webhook"))?;
        self.post(url, notification).await.map(|_| ())
    }

    async fn check_inbox(&self, request: &InboxRequest) -> Result<Vec<InboxMessage>, WebhookError> {
        let url = self
            .inbox_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("inbox poll url"))?;
        let body = self.post(url, request).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let payload: Value = serde_json::from_str(&body)?;
        Ok(parse_inbox(&payload))
    }

    fn has_bot(&self) -> bool {
        self.bot_url.is_some()
    }

    fn has_inbox(&self) -> bool {
        self.inbox_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bot_request_wire_format() {
        let req = BotRequest {
            message: "Quanto custa?".to_string(),
            user_id: "visitor".to_string(),
            user_name: Some("Ana".to_string()),
            user_email: None,
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["message"], "Quanto custa?");
        assert_eq!(v["userId"], "visitor");
        assert_eq!(v["userName"], "Ana");
        assert!(v["userEmail"].is_null());
        assert_eq!(v["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn notification_flattens_extra_fields() {
        let mut extra = serde_json::Map::new();
        extra.insert("previousMode".to_string(), json!("human"));
        let n = Notification {
            kind: NotificationKind::ModeChanged,
            message: String::new(),
            user_id: "visitor".to_string(),
            user_name: None,
            user_email: None,
            timestamp: Utc::now(),
            is_human_attendance: false,
            extra,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["type"], "MODE_CHANGED");
        assert_eq!(v["isHumanAttendance"], false);
        assert_eq!(v["previousMode"], "human");
    }

    #[test]
    fn inbox_request_has_check_type() {
        let v = serde_json::to_value(InboxRequest::new("visitor", Some("7".into()))).unwrap();
        assert_eq!(v, json!({ "userId": "visitor", "lastMessageId": "7", "type": "CHECK_MESSAGES" }));
    }

    #[test]
    fn inbox_batch_and_single_shapes() {
        let batch = json!({ "messages": [
            { "messageId": 8, "message": "Olá, sou a Carla.", "timestamp": "2024-05-01T12:00:00Z" },
            { "messageId": "9", "message": "" },
            { "message": "sem id" }
        ] });
        let parsed = parse_inbox(&batch);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].message_id, "8");
        assert_eq!(parsed[0].timestamp.as_deref(), Some("2024-05-01T12:00:00Z"));

        let single = json!({ "messageId": "abc", "message": "Pode me passar o nome da marca?" });
        assert_eq!(parse_inbox(&single)[0].message_id, "abc");

        assert!(parse_inbox(&json!({})).is_empty());
        assert!(parse_inbox(&json!({ "messages": [] })).is_empty());
    }
}
