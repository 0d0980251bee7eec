//! Environment-sourced configuration.
//!
//! Nothing is mandatory: the webhook endpoint is optional (send-only
//! deployments are supported) and every other field has a default.

use tracing::info;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SESSION_NAME: &str = "whatsapp-gateway";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TOKENS_PATH: &str = "./tokens";
/// Default address of the wppconnect sidecar.
const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:21465";

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listening port.
    pub port: u16,
    /// Webhook endpoint for inbound message forwarding (optional).
    pub webhook_url: Option<String>,
    /// Session name passed to the automation client.
    pub session_name: String,
    /// Log level used when RUST_LOG is not set.
    pub log_level: String,
    /// Folder where the automation client persists session credentials.
    pub tokens_path: String,
    /// Base URL of the automation sidecar.
    pub bridge_url: String,
}

impl Config {
    /// Load configuration from the environment. Never fails; malformed
    /// values fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            port: env_var("PORT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            webhook_url: env_var("WEBHOOK_URL"),
            session_name: env_var("SESSION_NAME")
                .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            tokens_path: env_var("TOKENS_PATH")
                .unwrap_or_else(|| DEFAULT_TOKENS_PATH.to_string()),
            bridge_url: env_var("WPP_BRIDGE_URL")
                .unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string()),
        }
    }

    /// Log a startup summary without leaking the webhook URL itself.
    pub fn log_summary(&self) {
        info!(
            port = self.port,
            session_name = %self.session_name,
            webhook = if self.webhook_url.is_some() {
                "configured"
            } else {
                "not configured"
            },
            "configuration loaded"
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            webhook_url: None,
            session_name: DEFAULT_SESSION_NAME.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            tokens_path: DEFAULT_TOKENS_PATH.to_string(),
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
