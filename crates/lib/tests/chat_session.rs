//! Integration tests: a chat session talking HTTP to mock webhooks and to the simulator.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use legado::chat::{AttendanceMode, ChatSession, SendOutcome};
use legado::config::{ChatConfig, ChatTexts};
use legado::simulator::{self, Intent, SimulatorState};
use legado::store::Sender;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type Recorded = Arc<Mutex<Vec<Value>>>;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

async fn record(State(seen): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    seen.lock().await.push(body);
    Json(json!({ "ok": true }))
}

/// Mock backend: `/bot` answers in the "resposta" shape, `/fail` is a 500,
/// `/slow` answers late, `/notify` records notifications.
async fn mock_backend() -> (String, Recorded, Recorded) {
    let bot_seen: Recorded = Arc::default();
    let notify_seen: Recorded = Arc::default();
    let bot = Router::new()
        .route(
            "/bot",
            post(|State(seen): State<Recorded>, Json(body): Json<Value>| async move {
                seen.lock().await.push(body);
                Json(json!({ "resposta": "O valor varia conforme a classe." }))
            }),
        )
        .with_state(bot_seen.clone());
    let app = Router::new()
        .route(
            "/fail",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(400)).await;
                Json(json!({ "output": "tarde demais" }))
            }),
        )
        .route("/notify", post(record))
        .with_state(notify_seen.clone())
        .merge(bot);
    (spawn(app).await, bot_seen, notify_seen)
}

fn config(base: &str, bot_path: &str) -> ChatConfig {
    ChatConfig {
        automated_webhook_url: Some(format!("{}{}", base, bot_path)),
        notification_webhook_url: Some(format!("{}/notify", base)),
        inbox_poll_url: None,
        poll_interval_ms: 20,
        poll_max_interval_ms: 100,
        request_timeout_ms: 5_000,
        ..ChatConfig::default()
    }
}

#[tokio::test]
async fn resposta_reply_is_shown_after_the_question() {
    let (base, bot_seen, _) = mock_backend().await;
    let session = ChatSession::with_webhooks(config(&base, "/bot"));
    let outcome = session.send("Quanto custa?").await;
    assert!(matches!(outcome, SendOutcome::Replied { cards: 1 }), "{:?}", outcome);

    let messages = session.messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].sender, Sender::User);
    assert_eq!(messages[2].text, "O valor varia conforme a classe.");

    let seen = bot_seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["message"], "Quanto custa?");
    assert_eq!(seen[0]["userId"], session.user_id());
}

#[tokio::test]
async fn http_500_appends_a_single_apology() {
    let (base, _, _) = mock_backend().await;
    let session = ChatSession::with_webhooks(config(&base, "/fail"));
    session.send("Quanto custa?").await;
    let messages = session.messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text, "Quanto custa?");
    assert_eq!(messages[2].text, ChatTexts::default().apology);
    assert!(!session.is_loading());
}

#[tokio::test]
async fn handoff_routes_following_messages_to_notifications() {
    let (base, bot_seen, notify_seen) = mock_backend().await;
    let session = ChatSession::with_webhooks(config(&base, "/bot"));

    let outcome = session.run_quick_action("q4").await.expect("known quick action");
    assert!(matches!(outcome, SendOutcome::Handoff(Ok(()))), "{:?}", outcome);
    assert_eq!(session.mode().await, AttendanceMode::Human);

    session.send("Meu nome é Ana").await;
    assert!(bot_seen.lock().await.is_empty());

    let seen = notify_seen.lock().await;
    let kinds: Vec<&str> = seen.iter().filter_map(|n| n["type"].as_str()).collect();
    assert_eq!(kinds, vec!["HUMAN_REQUESTED", "HUMAN_MESSAGE"]);
    assert_eq!(seen[1]["message"], "Meu nome é Ana");
    assert_eq!(seen[1]["isHumanAttendance"], true);
}

#[tokio::test]
async fn clear_leaves_only_the_greeting() {
    let (base, _, _) = mock_backend().await;
    let session = ChatSession::with_webhooks(config(&base, "/bot"));
    session.send("oi").await;
    session.send("quanto custa?").await;
    session.clear().await;
    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, ChatConfig::default().greeting_text);
}

#[tokio::test]
async fn late_reply_after_clear_is_discarded() {
    let (base, _, _) = mock_backend().await;
    let session = Arc::new(ChatSession::with_webhooks(config(&base, "/slow")));
    let sending = session.clone();
    let pending = tokio::spawn(async move { sending.send("oi").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.is_loading());
    session.clear().await;

    let outcome = pending.await.expect("send task");
    assert!(matches!(outcome, SendOutcome::Discarded), "{:?}", outcome);
    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages.iter().all(|m| m.text != "tarde demais"));
}

#[tokio::test]
async fn simulator_end_to_end() {
    let state = Arc::new(SimulatorState::new(Duration::ZERO));
    let base = spawn(simulator::router(state.clone())).await;
    let session = ChatSession::with_webhooks(ChatConfig {
        automated_webhook_url: Some(format!("{}/webhook", base)),
        notification_webhook_url: Some(format!("{}/notify", base)),
        inbox_poll_url: Some(format!("{}/inbox", base)),
        poll_interval_ms: 20,
        poll_max_interval_ms: 100,
        ..ChatConfig::default()
    });

    session.send("Qual o prazo?").await;
    let reply = session.messages().await.last().expect("reply").text.clone();
    assert!(Intent::Duration.replies().contains(&reply.as_str()), "{}", reply);

    session.request_human().await.expect("handoff accepted");
    state
        .queue_reply(
            Some(session.user_id().to_string()),
            "Olá! Aqui é a Carla, vou te ajudar.".to_string(),
        )
        .await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let messages = session.messages().await;
        if messages.iter().any(|m| m.text.contains("Carla")) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "operator reply not delivered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(session.return_to_automated().await);
    let kinds: Vec<String> = state
        .notifications()
        .await
        .iter()
        .filter_map(|n| n["type"].as_str().map(str::to_string))
        .collect();
    assert_eq!(kinds, vec!["HUMAN_REQUESTED", "MODE_CHANGED"]);
    session.shutdown().await;
}
