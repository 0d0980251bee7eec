//! Automation sidecar bridge.
//!
//! The browser automation that actually drives WhatsApp runs in a
//! wppconnect sidecar process; this client speaks its REST surface:
//! start/close a session, poll a cursor-based event feed, send text,
//! take over a conflicted session and reject calls. All lifecycle and
//! retry logic lives in the manager — this adapter only converts wire
//! events into typed `SessionEvent`s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::client::{ConnectOptions, SessionClient, SessionHandle};
use super::types::{
    BROADCAST_SENDER, ConnectionState, IncomingCall, IncomingMessage, MediaKind, SentMessage,
    SessionEvent, SessionStatus,
};

/// Timeout for plain API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Long-poll wait passed to the event feed (seconds).
const EVENT_POLL_WAIT_SECS: u32 = 25;
/// Back-off after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Consecutive poll failures tolerated before the session is reported lost.
const MAX_POLL_FAILURES: u32 = 3;

/// Client for the automation sidecar.
pub struct BridgeClient {
    base_url: String,
    client: Client,
    poll_error_backoff: Duration,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            poll_error_backoff: POLL_ERROR_BACKOFF,
        }
    }

    /// Shrink the poll-failure backoff (tests).
    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.poll_error_backoff = backoff;
        self
    }

    fn api_url(&self, session: &str, method: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, session, method)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("bridge HTTP error: {}", error));
        }

        let envelope: BridgeResponse<T> = response.json().await?;
        if !envelope.success {
            return Err(anyhow!(
                "bridge API error: {}",
                envelope.error.unwrap_or_default()
            ));
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("bridge returned success but no result"))
    }

    /// Poll one batch of events at the given cursor.
    async fn poll_events(&self, session: &str, after: i64) -> Result<Vec<BridgeEvent>> {
        let url = self.api_url(session, "events");
        let body = serde_json::json!({
            "after": after,
            "wait": EVENT_POLL_WAIT_SECS,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(EVENT_POLL_WAIT_SECS as u64 + 10))
            .send()
            .await?;

        let envelope: BridgeResponse<Vec<BridgeEvent>> = response.json().await?;
        if !envelope.success {
            return Err(anyhow!(
                "bridge API error: {}",
                envelope.error.unwrap_or_default()
            ));
        }
        Ok(envelope.result.unwrap_or_default())
    }
}

#[async_trait]
impl SessionClient for BridgeClient {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SessionHandle>> {
        let session = options.session_name.clone();
        let url = self.api_url(&session, "start-session");
        info!(session = %session, "starting sidecar session");

        let _: serde_json::Value = self
            .post(
                &url,
                serde_json::json!({ "tokensFolder": options.tokens_path }),
            )
            .await?;

        let active = Arc::new(AtomicBool::new(true));
        let handle = BridgeHandle {
            base_url: self.base_url.clone(),
            session: session.clone(),
            client: self.client.clone(),
            active: active.clone(),
        };

        // Feed poller; lives until the handle is closed or the manager
        // drops its receiver.
        let poller = BridgeClient {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            poll_error_backoff: self.poll_error_backoff,
        };
        tokio::spawn(async move {
            let cursor = AtomicI64::new(0);
            let mut failures = 0u32;
            info!(session = %session, "starting event feed polling");

            while active.load(Ordering::SeqCst) {
                match poller.poll_events(&session, cursor.load(Ordering::SeqCst)).await {
                    Ok(batch) => {
                        failures = 0;
                        for event in batch {
                            cursor.store(event.seq, Ordering::SeqCst);
                            let Some(converted) = event.into_session_event() else {
                                continue;
                            };
                            if events.send(converted).is_err() {
                                warn!("event receiver dropped, stopping polling");
                                active.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        error!(error = %err, failures, "event feed poll failed");
                        if failures >= MAX_POLL_FAILURES {
                            // The manager's reconnect policy takes over from
                            // here; a dead feed is a dead session.
                            error!("event feed unreachable, reporting session loss");
                            let _ = events
                                .send(SessionEvent::Status(SessionStatus::ServerClosed));
                            active.store(false, Ordering::SeqCst);
                            break;
                        }
                        tokio::time::sleep(poller.poll_error_backoff).await;
                    }
                }
            }

            info!("event feed polling stopped");
        });

        Ok(Box::new(handle))
    }
}

/// One live sidecar session.
pub struct BridgeHandle {
    base_url: String,
    session: String,
    client: Client,
    active: Arc<AtomicBool>,
}

impl BridgeHandle {
    fn api_url(&self, method: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, self.session, method)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("bridge HTTP error: {}", error));
        }

        let envelope: BridgeResponse<T> = response.json().await?;
        if !envelope.success {
            return Err(anyhow!(
                "bridge API error: {}",
                envelope.error.unwrap_or_default()
            ));
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("bridge returned success but no result"))
    }
}

#[async_trait]
impl SessionHandle for BridgeHandle {
    async fn send_text(&self, to: &str, body: &str) -> Result<SentMessage> {
        self.post(
            "send-text",
            serde_json::json!({ "to": to, "message": body }),
        )
        .await
    }

    async fn take_over(&self) -> Result<()> {
        let _: serde_json::Value = self.post("use-here", serde_json::json!({})).await?;
        Ok(())
    }

    fn supports_call_rejection(&self) -> bool {
        true
    }

    async fn reject_call(&self, call_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post("reject-call", serde_json::json!({ "id": call_id }))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        let _: serde_json::Value = self.post("close-session", serde_json::json!({})).await?;
        Ok(())
    }
}

// ============================================================================
// Sidecar wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct BridgeResponse<T> {
    success: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeEvent {
    seq: i64,
    #[serde(flatten)]
    body: BridgeEventBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum BridgeEventBody {
    Status { status: String },
    State { state: String },
    Message { message: BridgeMessage },
    Call { call: BridgeCall },
}

/// Message shape as emitted by the automation client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeMessage {
    id: String,
    from: String,
    sender: Option<BridgeSender>,
    body: Option<String>,
    caption: Option<String>,
    #[serde(rename = "type")]
    message_type: Option<String>,
    #[serde(default)]
    is_media: bool,
    #[serde(rename = "isMMS", default)]
    is_mms: bool,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    is_group_msg: bool,
    #[serde(default)]
    is_status: bool,
}

#[derive(Debug, Deserialize)]
struct BridgeSender {
    pushname: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeCall {
    id: String,
    peer_jid: String,
    #[serde(default)]
    is_video: bool,
}

impl BridgeEvent {
    fn into_session_event(self) -> Option<SessionEvent> {
        match self.body {
            BridgeEventBody::Status { status } => {
                debug!(status = %status, "bridge status event");
                Some(SessionEvent::Status(SessionStatus::from_signal(&status)))
            }
            BridgeEventBody::State { state } => {
                Some(SessionEvent::StateChange(ConnectionState::from_signal(&state)))
            }
            BridgeEventBody::Message { message } => {
                Some(SessionEvent::Message(message.into_incoming()))
            }
            BridgeEventBody::Call { call } => Some(SessionEvent::Call(IncomingCall {
                id: call.id,
                peer_jid: call.peer_jid,
                is_video: call.is_video,
            })),
        }
    }
}

impl BridgeMessage {
    fn into_incoming(self) -> IncomingMessage {
        let media = (self.is_media || self.is_mms)
            .then(|| MediaKind::from_type(self.message_type.as_deref().unwrap_or_default()));
        let is_broadcast = self.is_status || self.from == BROADCAST_SENDER;
        IncomingMessage {
            id: self.id,
            from: self.from,
            sender_name: self
                .sender
                .and_then(|sender| sender.pushname.or(sender.name)),
            body: self.body,
            caption: self.caption,
            media,
            from_me: self.from_me,
            is_group: self.is_group_msg,
            is_broadcast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_sidecar() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/test/start-session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": {"session": "test"}
            })))
            .mount(&server)
            .await;
        server
    }

    async fn connect_to(server: &MockServer) -> (Box<dyn SessionHandle>, mpsc::UnboundedReceiver<SessionEvent>) {
        let client =
            BridgeClient::new(server.uri()).with_poll_error_backoff(Duration::from_millis(1));
        let (tx, rx) = mpsc::unbounded_channel();
        let options = ConnectOptions {
            session_name: "test".to_string(),
            tokens_path: "./tokens".to_string(),
        };
        let handle = client.connect(options, tx).await.unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn test_feed_events_are_delivered() {
        let server = mock_sidecar().await;
        Mock::given(method("POST"))
            .and(path("/api/test/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": [{"seq": 1, "kind": "status", "status": "isLogged"}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/test/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": []
            })))
            .mount(&server)
            .await;

        let (_handle, mut rx) = connect_to(&server).await;
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event delivered")
            .expect("event channel closed");
        assert!(matches!(
            event,
            SessionEvent::Status(SessionStatus::LoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_sustained_poll_failures_report_session_loss() {
        let server = mock_sidecar().await;
        Mock::given(method("POST"))
            .and(path("/api/test/events"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_handle, mut rx) = connect_to(&server).await;

        // The poller gives up after its failure budget and surfaces the
        // dead feed as a lost session, then stops polling entirely.
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poller never reported session loss")
            .expect("event channel closed");
        assert!(matches!(
            event,
            SessionEvent::Status(SessionStatus::ServerClosed)
        ));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_api_url() {
        let client = BridgeClient::new("http://127.0.0.1:21465/");
        assert_eq!(
            client.api_url("my-session", "start-session"),
            "http://127.0.0.1:21465/api/my-session/start-session"
        );
    }

    #[test]
    fn test_status_event_conversion() {
        let event: BridgeEvent =
            serde_json::from_str(r#"{"seq": 7, "kind": "status", "status": "isLogged"}"#).unwrap();
        assert_eq!(event.seq, 7);
        match event.into_session_event() {
            Some(SessionEvent::Status(SessionStatus::LoggedIn)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_state_event_conversion() {
        let event: BridgeEvent =
            serde_json::from_str(r#"{"seq": 8, "kind": "state", "state": "CONFLICT"}"#).unwrap();
        match event.into_session_event() {
            Some(SessionEvent::StateChange(ConnectionState::Conflict)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_text_message_conversion() {
        let raw = r#"{
            "seq": 9,
            "kind": "message",
            "message": {
                "id": "msg-1",
                "from": "5511987654321@c.us",
                "sender": {"pushname": "Maria", "name": null},
                "body": "hello",
                "fromMe": false
            }
        }"#;
        let event: BridgeEvent = serde_json::from_str(raw).unwrap();
        let Some(SessionEvent::Message(msg)) = event.into_session_event() else {
            panic!("expected message event");
        };
        assert_eq!(msg.from, "5511987654321@c.us");
        assert_eq!(msg.sender_name, Some("Maria".to_string()));
        assert_eq!(msg.body, Some("hello".to_string()));
        assert!(msg.media.is_none());
        assert_eq!(msg.message_type(), "text");
    }

    #[test]
    fn test_media_message_conversion() {
        let raw = r#"{
            "seq": 10,
            "kind": "message",
            "message": {
                "id": "msg-2",
                "from": "5511987654321@c.us",
                "type": "ptt",
                "isMedia": true
            }
        }"#;
        let event: BridgeEvent = serde_json::from_str(raw).unwrap();
        let Some(SessionEvent::Message(msg)) = event.into_session_event() else {
            panic!("expected message event");
        };
        assert_eq!(msg.media, Some(MediaKind::Ptt));
        assert_eq!(msg.message_type(), "audio");
        assert_eq!(msg.content(), "[audio]");
    }

    #[test]
    fn test_typed_but_unflagged_message_stays_text() {
        // No media flag: classify as text even when a type tag is present.
        let raw = r#"{
            "seq": 11,
            "kind": "message",
            "message": {
                "id": "msg-3",
                "from": "5511987654321@c.us",
                "type": "chat",
                "body": "plain"
            }
        }"#;
        let event: BridgeEvent = serde_json::from_str(raw).unwrap();
        let Some(SessionEvent::Message(msg)) = event.into_session_event() else {
            panic!("expected message event");
        };
        assert!(msg.media.is_none());
        assert_eq!(msg.message_type(), "text");
    }

    #[test]
    fn test_broadcast_flag_from_sender() {
        let raw = r#"{
            "seq": 12,
            "kind": "message",
            "message": {
                "id": "msg-4",
                "from": "status@broadcast",
                "body": "story"
            }
        }"#;
        let event: BridgeEvent = serde_json::from_str(raw).unwrap();
        let Some(SessionEvent::Message(msg)) = event.into_session_event() else {
            panic!("expected message event");
        };
        assert!(msg.is_broadcast);
        assert!(msg.is_filtered());
    }

    #[test]
    fn test_call_event_conversion() {
        let raw = r#"{
            "seq": 13,
            "kind": "call",
            "call": {"id": "call-1", "peerJid": "5511987654321@c.us", "isVideo": true}
        }"#;
        let event: BridgeEvent = serde_json::from_str(raw).unwrap();
        let Some(SessionEvent::Call(call)) = event.into_session_event() else {
            panic!("expected call event");
        };
        assert_eq!(call.id, "call-1");
        assert!(call.is_video);
    }
}
