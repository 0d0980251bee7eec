//! Session lifecycle manager.
//!
//! Owns the single session handle and keeps `SessionState` consistent with
//! reality, self-healing on failure. All mutation of the handle slot, state
//! and reconnect counter happens behind one mutex, but the lock is never
//! held across handle I/O: the handle is cloned out and the guard dropped
//! before any sidecar call, so a slow send cannot stall status reads or
//! event processing. Client events arrive on an mpsc channel consumed by
//! a single loop: status and state-change events are applied inline (ordering
//! matters for state), while message and call handling run as spawned
//! tasks so a slow webhook retry never delays unrelated events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::webhook::WebhookNotifier;

use super::client::{ConnectOptions, SessionClient, SessionHandle};
use super::types::{
    CONTACT_DOMAIN, ConnectionState, IncomingCall, IncomingMessage, SessionEvent, SessionState,
    SessionStatus,
};

/// Reconnection gives up after this many attempts; exhaustion is fatal.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Flat delay between reconnect attempts (deliberately not exponential).
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Calls must ring briefly before the client accepts a rejection.
const CALL_RING_DELAY: Duration = Duration::from_secs(1);
/// Country code prefixed onto short (local) numbers.
const DEFAULT_COUNTRY_CODE: &str = "55";

/// Normalize a raw recipient number into a canonical identifier:
/// strip every non-digit, prefix the country code when the number looks
/// local (up to 11 digits), append the contact domain.
pub fn format_recipient(raw: &str) -> String {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 11 {
        digits.insert_str(0, DEFAULT_COUNTRY_CODE);
    }
    format!("{}{}", digits, CONTACT_DOMAIN)
}

/// Manager tuning; defaults match production behavior, tests shrink the
/// delays.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub session_name: String,
    pub tokens_path: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl SessionManagerConfig {
    pub fn new(session_name: impl Into<String>, tokens_path: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            tokens_path: tokens_path.into(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Read-only status snapshot exposed over the HTTP API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    pub session_name: String,
    pub reconnect_attempts: u32,
}

struct Inner {
    handle: Option<Arc<dyn SessionHandle>>,
    state: SessionState,
    reconnect_attempts: u32,
}

pub struct SessionManager {
    client: Arc<dyn SessionClient>,
    notifier: Arc<WebhookNotifier>,
    config: SessionManagerConfig,
    inner: Mutex<Inner>,
    /// Latch ensuring a single reconnect loop at a time.
    reconnecting: AtomicBool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    /// Signals `main` that the process must terminate.
    fatal_tx: mpsc::UnboundedSender<GatewayError>,
}

impl SessionManager {
    /// Create a manager. The returned receiver yields fatal errors
    /// (reconnect exhaustion); the process should exit when one arrives.
    pub fn new(
        client: Arc<dyn SessionClient>,
        notifier: Arc<WebhookNotifier>,
        config: SessionManagerConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<GatewayError>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            client,
            notifier,
            config,
            inner: Mutex::new(Inner {
                handle: None,
                state: SessionState::Disconnected,
                reconnect_attempts: 0,
            }),
            reconnecting: AtomicBool::new(false),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            fatal_tx,
        });
        (manager, fatal_rx)
    }

    /// Create the session handle and start consuming client events.
    ///
    /// On failure a reconnect is scheduled before the error is re-raised;
    /// the startup caller decides whether to abort.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), GatewayError> {
        info!(session = %self.config.session_name, "initializing session client");
        self.start_event_loop();
        match self.connect().await {
            Ok(()) => {
                info!("session client initialized");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to initialize session client");
                self.trigger_reconnect();
                Err(GatewayError::Initialization(err))
            }
        }
    }

    /// Spawn the event-consuming loop. Idempotent; the second call finds
    /// the receiver already taken.
    fn start_event_loop(self: &Arc<Self>) {
        let Some(mut rx) = self.events_rx.try_lock().ok().and_then(|mut slot| slot.take())
        else {
            return;
        };
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                manager.handle_event(event).await;
            }
            debug!("session event channel closed");
        });
    }

    async fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Status(status) => self.on_status(status).await,
            SessionEvent::StateChange(state) => self.on_state_change(state).await,
            SessionEvent::Message(message) => {
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.handle_incoming_message(message).await;
                });
            }
            SessionEvent::Call(call) => {
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.handle_incoming_call(call).await;
                });
            }
        }
    }

    async fn connect(&self) -> anyhow::Result<()> {
        let options = ConnectOptions {
            session_name: self.config.session_name.clone(),
            tokens_path: self.config.tokens_path.clone(),
        };
        let handle = self.client.connect(options, self.events_tx.clone()).await?;
        let mut inner = self.inner.lock().await;
        inner.handle = Some(Arc::from(handle));
        Ok(())
    }

    /// Apply a session status signal.
    pub(crate) async fn on_status(self: &Arc<Self>, status: SessionStatus) {
        info!(status = ?status, "session status changed");
        match status {
            SessionStatus::LoggedIn => {
                let mut inner = self.inner.lock().await;
                inner.state = SessionState::Connected;
                inner.reconnect_attempts = 0;
                info!("session connected");
            }
            SessionStatus::NotLoggedIn => {
                let mut inner = self.inner.lock().await;
                inner.state = SessionState::AwaitingAuthentication;
                warn!("session not logged in, scan the QR code");
            }
            SessionStatus::BrowserClosed
            | SessionStatus::DeviceDisconnected
            | SessionStatus::ServerClosed => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.state = SessionState::Disconnected;
                }
                error!(status = ?status, "session lost, scheduling reconnect");
                self.trigger_reconnect();
            }
            SessionStatus::QrReadSuccess => info!("QR code read successfully"),
            SessionStatus::QrReadFail => error!("QR code read failed"),
            SessionStatus::Other(signal) => debug!(signal = %signal, "unhandled session status"),
        }
    }

    /// Apply a stream-level connection state signal.
    ///
    /// A Conflict both counts as connected and triggers a take-over
    /// command; that conflation matches the observed client behavior.
    async fn on_state_change(self: &Arc<Self>, state: ConnectionState) {
        info!(state = ?state, "connection state changed");

        if matches!(state, ConnectionState::Connected | ConnectionState::Conflict) {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::Connected;
            inner.reconnect_attempts = 0;
        }

        if matches!(state, ConnectionState::Conflict | ConnectionState::Unlaunched) {
            let handle = self.inner.lock().await.handle.clone();
            match handle {
                Some(handle) => {
                    if let Err(err) = handle.take_over().await {
                        warn!(error = %err, "failed to take over session");
                    }
                }
                None => warn!("no session handle available for take-over"),
            }
        }

        if matches!(state, ConnectionState::Unpaired | ConnectionState::UnpairedIdle) {
            {
                let mut inner = self.inner.lock().await;
                inner.state = SessionState::Disconnected;
            }
            warn!("device unpaired, scheduling reconnect");
            self.trigger_reconnect();
        }
    }

    /// Schedule a reconnect loop unless one is already running.
    fn trigger_reconnect(self: &Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("reconnect already in progress");
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            let result = manager.reconnect_loop().await;
            manager.reconnecting.store(false, Ordering::SeqCst);
            if let Err(err) = result {
                error!(error = %err, "reconnect attempts exhausted, terminating");
                let _ = manager.fatal_tx.send(err);
            }
        });
    }

    /// Bounded reconnect loop: release the old handle (best effort), wait
    /// a flat delay, connect again. Gives up with `ReconnectExhausted`
    /// once the attempt budget is spent, without trying another connect.
    async fn reconnect_loop(&self) -> Result<(), GatewayError> {
        loop {
            let (attempt, stale) = {
                let mut inner = self.inner.lock().await;
                if inner.reconnect_attempts >= self.config.max_reconnect_attempts {
                    return Err(GatewayError::ReconnectExhausted);
                }
                inner.reconnect_attempts += 1;
                inner.state = SessionState::Disconnected;
                (inner.reconnect_attempts, inner.handle.take())
            };

            if let Some(handle) = stale {
                if let Err(err) = handle.close().await {
                    debug!(error = %err, "error closing previous session handle");
                }
            }

            warn!(
                attempt,
                max = self.config.max_reconnect_attempts,
                "attempting to reconnect"
            );
            sleep(self.config.reconnect_delay).await;

            match self.connect().await {
                Ok(()) => {
                    info!(attempt, "session client reconnected");
                    return Ok(());
                }
                Err(err) => error!(error = %err, attempt, "reconnect attempt failed"),
            }
        }
    }

    /// Filter and forward an inbound message. Webhook failures are logged
    /// by the notifier and never propagate; a webhook outage must not
    /// crash message processing.
    pub(crate) async fn handle_incoming_message(&self, message: IncomingMessage) {
        if message.is_filtered() {
            debug!(from = %message.from, "dropping filtered message");
            return;
        }
        info!(
            from = %message.from,
            message_type = message.message_type(),
            "message received"
        );
        self.notifier.forward(&message).await;
    }

    /// Reject an incoming call after letting it ring briefly.
    pub(crate) async fn handle_incoming_call(&self, call: IncomingCall) {
        info!(from = %call.peer_jid, is_video = call.is_video, "incoming call, rejecting");
        sleep(CALL_RING_DELAY).await;

        let handle = self.inner.lock().await.handle.clone();
        match handle {
            Some(handle) if handle.supports_call_rejection() => {
                match handle.reject_call(&call.id).await {
                    Ok(()) => info!("call rejected"),
                    Err(err) => error!(error = %err, "failed to reject call"),
                }
            }
            Some(_) => warn!("session client does not support call rejection"),
            None => warn!("no session handle, cannot reject call"),
        }
    }

    /// Send a text message through the session.
    pub async fn send_message(
        &self,
        number: &str,
        text: &str,
    ) -> Result<super::types::SentMessage, GatewayError> {
        let handle = {
            let inner = self.inner.lock().await;
            let handle = inner
                .handle
                .clone()
                .ok_or(GatewayError::NotInitialized)?;
            if inner.state != SessionState::Connected {
                return Err(GatewayError::NotConnected);
            }
            handle
        };

        let to = format_recipient(number);
        info!(to = %to, "sending message");
        match handle.send_text(&to, text).await {
            Ok(sent) => {
                info!(message_id = %sent.id, "message sent");
                Ok(sent)
            }
            Err(err) => {
                error!(error = %err, "failed to send message");
                Err(GatewayError::Send(err))
            }
        }
    }

    /// Read-only status snapshot; no side effects.
    pub async fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        StatusSnapshot {
            connected: inner.state == SessionState::Connected,
            session_name: self.config.session_name.clone(),
            reconnect_attempts: inner.reconnect_attempts,
        }
    }

    /// Release the session handle on shutdown. Best effort; errors are
    /// logged and swallowed.
    pub async fn shutdown(&self) {
        let handle = {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::Disconnected;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            info!("closing session handle");
            if let Err(err) = handle.close().await {
                error!(error = %err, "error closing session handle");
            }
        }
    }
}
