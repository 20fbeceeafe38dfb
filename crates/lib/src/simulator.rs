//! Local stand-in for the chat backends, for development without a real automation.
//!
//! - `POST /webhook`: canned Portuguese reply picked by keyword intent, after a delay.
//! - `POST /notify`: records the notification.
//! - `POST /inbox`: operator replies newer than `lastMessageId`.
//! - `POST /operator`: queue an operator reply (play the human agent with curl).
//! - `GET /notifications`: everything `/notify` has recorded.

use crate::config::SimulatorConfig;
use crate::server::shutdown_signal;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Keyword intent of a visitor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Registration,
    Price,
    Duration,
    Contact,
    Other,
}

impl Intent {
    pub fn replies(self) -> &'static [&'static str] {
        match self {
            Intent::Greeting => &["Olá!", "Oi, tudo bem?", "Olá, como posso ajudar?"],
            Intent::Registration => &[
                "Para registrar sua marca, precisamos fazer uma análise de viabilidade primeiro. Podemos iniciar esse processo agora mesmo.",
                "O registro de marca é um processo importante para proteger seu negócio. Qual é o nome da sua marca?",
            ],
            Intent::Price => &[
                "O preço do registro varia conforme a classe e o escopo da proteção. Podemos fazer um orçamento personalizado para você. Qual é o seu ramo de atividade?",
            ],
            Intent::Duration => &[
                "O processo de registro no INPI leva em média 12 a 18 meses para ser concluído. Durante esse período, sua marca já recebe proteção provisória.",
            ],
            Intent::Contact => &[
                "Você pode falar conosco pelo telefone (12) 3341-0600 ou pelo WhatsApp. Deseja que entremos em contato com você?",
            ],
            Intent::Other => &[
                "Entendi. Poderia nos fornecer mais detalhes para ajudarmos melhor?",
                "Interessante. Como posso ajudar com isso?",
                "Compreendo sua necessidade. Temos especialistas que podem auxiliar nesse processo.",
            ],
        }
    }
}

fn intent_rules() -> &'static [(Intent, Regex)] {
    static RULES: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (Intent::Greeting, r"ol[aá]|oi|bom dia|boa tarde|boa noite"),
            (Intent::Registration, r"registr|protect|marca"),
            (Intent::Price, r"pre[çc]o|valor|custo|quanto custa"),
            (Intent::Duration, r"tempo|prazo|demora|dura[çc][aã]o"),
            (Intent::Contact, r"contato|telefone|email|whatsapp"),
        ]
        .into_iter()
        .filter_map(|(intent, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((intent, re)),
            Err(e) => {
                log::error!("simulator: bad intent pattern {}: {}", pattern, e);
                None
            }
        })
        .collect()
    })
}

/// First matching intent, checked in a fixed order (greeting wins over everything).
pub fn detect_intent(message: &str) -> Intent {
    let message = message.to_lowercase();
    intent_rules()
        .iter()
        .find(|(_, re)| re.is_match(&message))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::Other)
}

pub fn pick_reply(intent: Intent) -> &'static str {
    intent
        .replies()
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Entendi.")
}

#[derive(Debug, Clone)]
struct OperatorReply {
    id: u64,
    user_id: Option<String>,
    message: String,
    timestamp: String,
}

#[derive(Debug, Default)]
struct Inner {
    notifications: Vec<Value>,
    replies: Vec<OperatorReply>,
    next_id: u64,
}

/// Recorded notifications and queued operator replies.
#[derive(Debug, Default)]
pub struct SimulatorState {
    latency: Duration,
    inner: Mutex<Inner>,
}

impl SimulatorState {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queue an operator reply; `user_id` None means every visitor sees it.
    pub async fn queue_reply(&self, user_id: Option<String>, message: String) -> u64 {
        let mut g = self.inner.lock().await;
        g.next_id += 1;
        let id = g.next_id;
        g.replies.push(OperatorReply {
            id,
            user_id,
            message,
            timestamp: Utc::now().to_rfc3339(),
        });
        id
    }

    pub async fn notifications(&self) -> Vec<Value> {
        self.inner.lock().await.notifications.clone()
    }
}

fn error_body(status: StatusCode, msg: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": msg })))
}

fn message_field(body: &Bytes) -> Option<(Value, String)> {
    let v: Value = serde_json::from_slice(body).ok()?;
    let message = v.get("message")?.as_str()?.to_string();
    Some((v, message))
}

async fn webhook(
    State(state): State<Arc<SimulatorState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some((payload, message)) = message_field(&body) else {
        log::warn!("simulator: unreadable webhook body");
        return Err(error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Erro ao processar mensagem",
        ));
    };
    if let Some(kind) = payload.get("type").and_then(Value::as_str) {
        log::info!("simulator: webhook notice {}", kind);
        return Ok(Json(json!({ "ok": true })));
    }
    log::info!("simulator: message received: {}", message);
    let reply = pick_reply(detect_intent(&message));
    tokio::time::sleep(state.latency).await;
    Ok(Json(json!({ "response": reply })))
}

async fn notify(
    State(state): State<Arc<SimulatorState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let v: Value = serde_json::from_slice(&body)
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "invalid json"))?;
    log::info!(
        "simulator: notification {} from {}",
        v.get("type").and_then(Value::as_str).unwrap_or("?"),
        v.get("userId").and_then(Value::as_str).unwrap_or("?")
    );
    state.inner.lock().await.notifications.push(v);
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboxQuery {
    user_id: Option<String>,
    last_message_id: Option<Value>,
}

fn last_id(v: Option<&Value>) -> u64 {
    match v {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

async fn inbox(
    State(state): State<Arc<SimulatorState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let query: InboxQuery = serde_json::from_slice(&body)
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "invalid json"))?;
    let after = last_id(query.last_message_id.as_ref());
    let g = state.inner.lock().await;
    let messages: Vec<Value> = g
        .replies
        .iter()
        .filter(|r| r.id > after)
        .filter(|r| match (&r.user_id, &query.user_id) {
            (Some(target), Some(user)) => target == user,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .map(|r| {
            json!({
                "messageId": r.id.to_string(),
                "message": r.message,
                "timestamp": r.timestamp,
            })
        })
        .collect();
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperatorBody {
    message: String,
    user_id: Option<String>,
}

async fn operator(
    State(state): State<Arc<SimulatorState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let req: OperatorBody = serde_json::from_slice(&body)
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "expected {\"message\": ...}"))?;
    if req.message.trim().is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "empty message"));
    }
    let id = state.queue_reply(req.user_id, req.message).await;
    log::info!("simulator: queued operator reply {}", id);
    Ok(Json(json!({ "ok": true, "messageId": id.to_string() })))
}

async fn list_notifications(State(state): State<Arc<SimulatorState>>) -> Json<Value> {
    Json(Value::Array(state.notifications().await))
}

pub fn router(state: Arc<SimulatorState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/notify", post(notify))
        .route("/inbox", post(inbox))
        .route("/operator", post(operator))
        .route("/notifications", get(list_notifications))
        .with_state(state)
}

/// Run the simulator until SIGINT/SIGTERM.
pub async fn run_simulator(config: &SimulatorConfig) -> Result<()> {
    let state = Arc::new(SimulatorState::new(Duration::from_millis(config.latency_ms)));
    let bind_addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("simulator: listening on http://{}", bind_addr);
    log::info!(
        "simulator: point automatedWebhookUrl at /webhook, notificationWebhookUrl at /notify, inboxPollUrl at /inbox"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("simulator exited")?;
    log::info!("simulator: stopped");
    Ok(())
}
