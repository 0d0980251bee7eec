//! Webhook delivery pipeline.
//!
//! Converts one inbound message into a webhook POST with bounded retry
//! and linear backoff. Delivery is at-least-once: the endpoint must
//! tolerate duplicates. Outcomes are reported as booleans, never errors;
//! the caller only logs them.

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::session::types::{CONTACT_DOMAIN, IncomingMessage};

/// Delivery gives up after this many HTTP attempts.
const MAX_RETRIES: u32 = 3;
/// Base delay between attempts; attempt N waits N times this.
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Per-attempt HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Sender-name fallback when the client provides none.
const UNKNOWN_SENDER: &str = "Unknown";

/// Canonical payload posted to the webhook endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub name: String,
    /// Sender number with the domain suffix stripped.
    pub number: String,
    pub message_type: &'static str,
    pub message: String,
    /// RFC 3339 timestamp of the forwarding moment.
    pub timestamp: String,
}

impl WebhookPayload {
    /// Derive a payload from an inbound message; deterministic except for
    /// the timestamp.
    pub fn from_message(message: &IncomingMessage) -> Self {
        Self {
            name: message
                .sender_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            number: message
                .from
                .strip_suffix(CONTACT_DOMAIN)
                .unwrap_or(&message.from)
                .to_string(),
            message_type: message.message_type(),
            message: message.content(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Delivers payloads to a single configured endpoint.
pub struct WebhookNotifier {
    endpoint: Option<String>,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl WebhookNotifier {
    /// Create a notifier. `None` means no endpoint is configured, which
    /// is a supported send-only mode.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Shrink the backoff base delay (tests).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Format an inbound message and deliver it.
    pub async fn forward(&self, message: &IncomingMessage) -> bool {
        let payload = WebhookPayload::from_message(message);
        debug!(
            number = %payload.number,
            message_type = payload.message_type,
            "prepared webhook payload"
        );
        self.send(&payload).await
    }

    /// Deliver a payload with bounded retry. Returns whether any attempt
    /// succeeded; an unconfigured endpoint skips immediately.
    pub async fn send(&self, payload: &WebhookPayload) -> bool {
        let Some(url) = self.endpoint.as_deref() else {
            warn!("webhook URL not configured, skipping delivery");
            return false;
        };

        for attempt in 1..=self.max_retries {
            debug!(attempt, max = self.max_retries, url, "posting to webhook");

            let result = self
                .client
                .post(url)
                .json(payload)
                .timeout(self.request_timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(
                        status = response.status().as_u16(),
                        number = %payload.number,
                        "webhook delivered"
                    );
                    return true;
                }
                Ok(response) => {
                    error!(
                        status = response.status().as_u16(),
                        attempt,
                        "webhook endpoint rejected delivery"
                    );
                }
                Err(err) => {
                    error!(error = %err, attempt, "webhook request failed");
                }
            }

            if attempt < self.max_retries {
                sleep(self.retry_delay * attempt).await;
            }
        }

        error!("all webhook delivery attempts failed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::MediaKind;
    use std::time::Instant;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier_for(server: &MockServer) -> WebhookNotifier {
        WebhookNotifier::new(Some(format!("{}/webhook", server.uri())))
            .with_retry_delay(Duration::from_millis(20))
    }

    fn sample_message() -> IncomingMessage {
        IncomingMessage::text("m1", "5511987654321@c.us", "hello").with_sender_name("Maria")
    }

    #[test]
    fn test_payload_from_text_message() {
        let payload = WebhookPayload::from_message(&sample_message());
        assert_eq!(payload.name, "Maria");
        assert_eq!(payload.number, "5511987654321");
        assert_eq!(payload.message_type, "text");
        assert_eq!(payload.message, "hello");
        assert!(!payload.timestamp.is_empty());
    }

    #[test]
    fn test_payload_fallbacks() {
        let msg = IncomingMessage::media("m1", "5511987654321@c.us", MediaKind::Image);
        let payload = WebhookPayload::from_message(&msg);
        assert_eq!(payload.name, "Unknown");
        assert_eq!(payload.message_type, "image");
        assert_eq!(payload.message, "[image]");

        let msg = IncomingMessage::media("m2", "5511987654321@c.us", MediaKind::Ptt)
            .with_caption("listen to this");
        let payload = WebhookPayload::from_message(&msg);
        assert_eq!(payload.message_type, "audio");
        assert_eq!(payload.message, "listen to this");
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = WebhookPayload::from_message(&sample_message());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["name"], "Maria");
        assert_eq!(json["number"], "5511987654321");
        assert_eq!(json["messageType"], "text");
        assert_eq!(json["message"], "hello");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_send_without_endpoint_skips() {
        let notifier = WebhookNotifier::new(None);
        let payload = WebhookPayload::from_message(&sample_message());
        assert!(!notifier.send(&payload).await);
    }

    #[tokio::test]
    async fn test_send_success_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "number": "5511987654321",
                "messageType": "text",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server);
        assert!(notifier.forward(&sample_message()).await);
    }

    #[tokio::test]
    async fn test_send_recovers_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server);
        let payload = WebhookPayload::from_message(&sample_message());

        let started = Instant::now();
        assert!(notifier.send(&payload).await);
        // Linear backoff: base * 1 + base * 2.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server);
        let payload = WebhookPayload::from_message(&sample_message());
        assert!(!notifier.send(&payload).await);
    }

    #[tokio::test]
    async fn test_connection_errors_count_as_attempts() {
        // Port from a server that is immediately shut down.
        let server = MockServer::start().await;
        let url = format!("{}/webhook", server.uri());
        drop(server);

        let notifier = WebhookNotifier::new(Some(url))
            .with_retry_delay(Duration::from_millis(5))
            .with_request_timeout(Duration::from_millis(200));
        let payload = WebhookPayload::from_message(&sample_message());
        assert!(!notifier.send(&payload).await);
    }
}
