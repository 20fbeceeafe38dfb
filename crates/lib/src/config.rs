//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.legado/config.json`) and environment.
//! Webhook URLs are usually supplied through the environment at deploy time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Chat widget settings (webhooks, card limit, display text).
    #[serde(default)]
    pub chat: ChatConfig,

    /// Static asset server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Local webhook simulator settings.
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Chat session settings. Passed to the session controller at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Webhook answering visitor messages in automated mode. Overridden by LEGADO_WEBHOOK_URL or VITE_WEBHOOK_URL.
    #[serde(default)]
    pub automated_webhook_url: Option<String>,

    /// Webhook receiving handoff requests and human-mode messages. Overridden by LEGADO_NOTIFICATION_WEBHOOK_URL.
    #[serde(default)]
    pub notification_webhook_url: Option<String>,

    /// Endpoint polled for operator replies in human mode. Overridden by LEGADO_INBOX_URL.
    #[serde(default)]
    pub inbox_poll_url: Option<String>,

    /// Maximum characters per display card (default 250).
    #[serde(default = "default_card_char_limit")]
    pub card_char_limit: usize,

    /// Inbox poll interval in human mode; also the backoff base (default 3000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Ceiling for the poll backoff after consecutive failures (default 30000).
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,

    /// Timeout applied to every webhook request (default 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// First bot message of every conversation (also what "clear" resets to).
    #[serde(default = "default_greeting_text")]
    pub greeting_text: String,

    /// Name shown in the chat header.
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Header and launcher color.
    #[serde(default = "default_theme_color")]
    pub theme_color: String,

    /// Visitor text that requests a human operator (case-insensitive substring match).
    #[serde(default = "default_handoff_phrases")]
    pub handoff_phrases: Vec<String>,

    /// When true, automated replies are also posted to the notification webhook as BOT_MESSAGE.
    #[serde(default)]
    pub mirror_bot_messages: bool,

    /// Fixed texts appended by the controller.
    #[serde(default)]
    pub texts: ChatTexts,
}

/// Fallback and confirmation messages shown to the visitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatTexts {
    /// Appended once when a send fails (network, status, malformed body).
    pub apology: String,
    /// Appended when the backend answered but no text could be extracted.
    pub no_text: String,
    /// Appended when a send is attempted without a configured webhook.
    pub not_configured: String,
    /// Persistent warning while the automated webhook is missing.
    pub config_warning: String,
    /// Appended after a successful handoff request.
    pub handoff_confirmation: String,
    /// Appended when the handoff request fails and the mode reverts.
    pub handoff_failed: String,
    /// Appended when the visitor goes back to the automated assistant.
    pub automated_resumed: String,
}

impl Default for ChatTexts {
    fn default() -> Self {
        Self {
            apology: "Ocorreu um erro na comunicação. Por favor, tente novamente mais tarde ou entre em contato por telefone.".to_string(),
            no_text: "Desculpe, não consegui processar a resposta. Pode reformular sua pergunta?".to_string(),
            not_configured: "Desculpe, não foi possível processar sua mensagem. O sistema não está configurado corretamente.".to_string(),
            config_warning: "Configuração incompleta. Entre em contato com o suporte.".to_string(),
            handoff_confirmation: "Certo! Um de nossos especialistas foi avisado e vai responder por aqui em instantes.".to_string(),
            handoff_failed: "Desculpe, não foi possível chamar um atendente agora. Continuo por aqui para ajudar.".to_string(),
            automated_resumed: "Você voltou a falar com o assistente virtual.".to_string(),
        }
    }
}

fn default_card_char_limit() -> usize {
    250
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_poll_max_interval_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_greeting_text() -> String {
    "Olá! Sou o assistente virtual da Legado Marcas. Como posso ajudar você com o registro da sua marca hoje?".to_string()
}

fn default_display_name() -> String {
    "Legado Assistente".to_string()
}

fn default_theme_color() -> String {
    "#1E40AF".to_string()
}

fn default_handoff_phrases() -> Vec<String> {
    vec![
        "falar com humano".to_string(),
        "falar com um humano".to_string(),
        "atendente humano".to_string(),
        "falar com um atendente".to_string(),
    ]
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            automated_webhook_url: None,
            notification_webhook_url: None,
            inbox_poll_url: None,
            card_char_limit: default_card_char_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            greeting_text: default_greeting_text(),
            display_name: default_display_name(),
            theme_color: default_theme_color(),
            handoff_phrases: default_handoff_phrases(),
            mirror_bot_messages: false,
            texts: ChatTexts::default(),
        }
    }
}

/// Static asset server bind, port and asset directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port (default 3000). Overridden by PORT env.
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Prebuilt asset directory (default "dist"). Must contain index.html.
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
}

fn default_server_port() -> u16 {
    3000
}

fn default_server_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
            dist_dir: default_dist_dir(),
        }
    }
}

/// Webhook simulator bind, port and artificial latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    #[serde(default = "default_simulator_port")]
    pub port: u16,

    #[serde(default = "default_simulator_bind")]
    pub bind: String,

    /// Delay before answering /webhook, to look like a real automation (default 1000).
    #[serde(default = "default_simulator_latency_ms")]
    pub latency_ms: u64,
}

fn default_simulator_port() -> u16 {
    3001
}

fn default_simulator_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_simulator_latency_ms() -> u64 {
    1000
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: default_simulator_port(),
            bind: default_simulator_bind(),
            latency_ms: default_simulator_latency_ms(),
        }
    }
}

/// Serializes tests that set process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Trimmed, non-empty value of the first set variable among `names`.
fn env_value(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name).ok().and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
    })
}

fn config_value(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the automated webhook URL: env LEGADO_WEBHOOK_URL (or VITE_WEBHOOK_URL) overrides config.
pub fn resolve_automated_webhook_url(config: &Config) -> Option<String> {
    env_value(&["LEGADO_WEBHOOK_URL", "VITE_WEBHOOK_URL"])
        .or_else(|| config_value(&config.chat.automated_webhook_url))
}

/// Resolve the notification webhook URL: env LEGADO_NOTIFICATION_WEBHOOK_URL overrides config.
pub fn resolve_notification_webhook_url(config: &Config) -> Option<String> {
    env_value(&["LEGADO_NOTIFICATION_WEBHOOK_URL"])
        .or_else(|| config_value(&config.chat.notification_webhook_url))
}

/// Resolve the inbox poll URL: env LEGADO_INBOX_URL overrides config.
pub fn resolve_inbox_poll_url(config: &Config) -> Option<String> {
    env_value(&["LEGADO_INBOX_URL"]).or_else(|| config_value(&config.chat.inbox_poll_url))
}

/// Resolve the asset server port: env PORT overrides config when it parses.
pub fn resolve_server_port(config: &Config) -> u16 {
    match env_value(&["PORT"]) {
        Some(p) => match p.parse() {
            Ok(port) => port,
            Err(_) => {
                log::warn!("ignoring invalid PORT value: {}", p);
                config.server.port
            }
        },
        None => config.server.port,
    }
}

impl Config {
    /// Copy of this config with every environment override applied (chat URLs and `PORT`).
    pub fn with_env_overrides(mut self) -> Self {
        self.chat.automated_webhook_url = resolve_automated_webhook_url(&self);
        self.chat.notification_webhook_url = resolve_notification_webhook_url(&self);
        self.chat.inbox_poll_url = resolve_inbox_poll_url(&self);
        self.server.port = resolve_server_port(&self);
        self
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LEGADO_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".legado").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, LEGADO_CONFIG_PATH or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
