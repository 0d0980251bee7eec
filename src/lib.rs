//! HTTP gateway bridging a WhatsApp automation session to a webhook.
//!
//! Three concerns: keeping the session alive (with bounded reconnection),
//! forwarding inbound messages to a configured webhook with retries, and
//! exposing an HTTP API for health, status and outbound sends.

pub mod api;
pub mod config;
pub mod error;
pub mod session;
pub mod webhook;

use std::sync::Arc;

use tokio::sync::mpsc;

use config::Config;
use error::GatewayError;
use session::client::SessionClient;
use session::manager::{SessionManager, SessionManagerConfig};
use webhook::WebhookNotifier;

/// Wires configuration, webhook notifier and session manager together.
pub struct AppCore {
    pub config: Config,
    pub manager: Arc<SessionManager>,
}

impl AppCore {
    /// Assemble the application around the given session client. The
    /// returned receiver carries fatal errors; the caller should exit
    /// when one arrives.
    pub fn new(
        config: Config,
        client: Arc<dyn SessionClient>,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayError>) {
        let notifier = Arc::new(WebhookNotifier::new(config.webhook_url.clone()));
        let manager_config =
            SessionManagerConfig::new(config.session_name.clone(), config.tokens_path.clone());
        let (manager, fatal_rx) = SessionManager::new(client, notifier, manager_config);
        (Self { config, manager }, fatal_rx)
    }
}
