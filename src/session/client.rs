//! Session client trait definitions.
//!
//! The automation client that actually drives WhatsApp is an external
//! collaborator. These traits are the seam: the gateway only needs
//! connect, text sending, session take-over, call rejection and close.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{SentMessage, SessionEvent};

/// Options passed to the client when creating a session handle.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Session name (selects the persisted credential set).
    pub session_name: String,
    /// Folder where the client stores session tokens.
    pub tokens_path: String,
}

/// Factory for session handles.
///
/// `connect` blocks until the handle is usable or creation fails. Events
/// (status changes, state changes, inbound messages, calls) are pushed
/// onto `events` for as long as the handle lives.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SessionHandle>>;
}

/// One live connection to the messaging backend.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Send a text message to a canonical recipient identifier.
    async fn send_text(&self, to: &str, body: &str) -> Result<SentMessage>;

    /// Claim the session when another device/tab holds it.
    async fn take_over(&self) -> Result<()>;

    /// Whether the client exposes call rejection at all.
    fn supports_call_rejection(&self) -> bool {
        false
    }

    /// Reject an incoming call by ID.
    async fn reject_call(&self, call_id: &str) -> Result<()>;

    /// Release the connection. Best effort; callers swallow errors.
    async fn close(&self) -> Result<()>;
}
