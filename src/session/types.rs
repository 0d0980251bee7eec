//! Session event and message types.
//!
//! The automation client reports two distinct signal families: session
//! status (login/QR/browser lifecycle) and connection state (the
//! underlying stream). Both are parsed from the client's wire vocabulary
//! here; the transition logic lives in the manager.

use serde::{Deserialize, Serialize};

/// Suffix identifying group conversations.
pub const GROUP_DOMAIN: &str = "@g.us";
/// Suffix identifying direct-contact conversations.
pub const CONTACT_DOMAIN: &str = "@c.us";
/// Pseudo-sender used by status/broadcast messages.
pub const BROADCAST_SENDER: &str = "status@broadcast";

/// Connection state of the single managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    /// A QR scan is pending.
    AwaitingAuthentication,
    Connected,
    Conflict,
}

/// Session status signals from the client's status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedIn,
    NotLoggedIn,
    BrowserClosed,
    DeviceDisconnected,
    QrReadSuccess,
    QrReadFail,
    ServerClosed,
    Other(String),
}

impl SessionStatus {
    /// Parse a raw status signal. Unknown signals are preserved verbatim.
    pub fn from_signal(signal: &str) -> Self {
        match signal {
            "isLogged" => Self::LoggedIn,
            "notLogged" => Self::NotLoggedIn,
            "browserClose" => Self::BrowserClosed,
            // Original wire spelling from the automation client.
            "desconnectedMobile" => Self::DeviceDisconnected,
            "qrReadSuccess" => Self::QrReadSuccess,
            "qrReadFail" => Self::QrReadFail,
            "serverClose" => Self::ServerClosed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Stream-level connection state signals from the client's state-change
/// callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Conflict,
    Unlaunched,
    Unpaired,
    UnpairedIdle,
    Other(String),
}

impl ConnectionState {
    /// Parse a raw state-change signal. Unknown signals are preserved
    /// verbatim.
    pub fn from_signal(signal: &str) -> Self {
        match signal {
            "CONNECTED" => Self::Connected,
            "CONFLICT" => Self::Conflict,
            "UNLAUNCHED" => Self::Unlaunched,
            "UNPAIRED" => Self::Unpaired,
            "UNPAIRED_IDLE" => Self::UnpairedIdle,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Media sub-type of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    /// Push-to-talk voice note; classified as audio.
    Ptt,
    Document,
    Sticker,
    Other,
}

impl MediaKind {
    pub fn from_type(message_type: &str) -> Self {
        match message_type {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "ptt" => Self::Ptt,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            _ => Self::Other,
        }
    }
}

/// Inbound message event from the session.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    /// Sender identifier including the domain suffix (e.g. "5511...@c.us").
    pub from: String,
    pub sender_name: Option<String>,
    pub body: Option<String>,
    pub caption: Option<String>,
    /// Present iff the client flagged the message as media/MMS.
    pub media: Option<MediaKind>,
    pub from_me: bool,
    pub is_group: bool,
    pub is_broadcast: bool,
}

impl IncomingMessage {
    /// Create a plain text message.
    pub fn text(id: impl Into<String>, from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            sender_name: None,
            body: Some(body.into()),
            caption: None,
            media: None,
            from_me: false,
            is_group: false,
            is_broadcast: false,
        }
    }

    /// Create a media message with no body.
    pub fn media(id: impl Into<String>, from: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            sender_name: None,
            body: None,
            caption: None,
            media: Some(kind),
            from_me: false,
            is_group: false,
            is_broadcast: false,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Message type tag used in webhook payloads.
    pub fn message_type(&self) -> &'static str {
        match self.media {
            Some(MediaKind::Image) => "image",
            Some(MediaKind::Video) => "video",
            Some(MediaKind::Audio) | Some(MediaKind::Ptt) => "audio",
            Some(MediaKind::Document) => "document",
            Some(MediaKind::Sticker) => "sticker",
            Some(MediaKind::Other) => "media",
            None => "text",
        }
    }

    /// Content forwarded to the webhook: body, then caption, then a
    /// bracketed type tag.
    pub fn content(&self) -> String {
        if let Some(body) = self.body.as_deref().filter(|body| !body.is_empty()) {
            return body.to_string();
        }
        if let Some(caption) = self.caption.as_deref().filter(|caption| !caption.is_empty()) {
            return caption.to_string();
        }
        format!("[{}]", self.message_type())
    }

    /// Whether this message should be dropped before webhook forwarding.
    pub fn is_filtered(&self) -> bool {
        self.from_me
            || self.is_broadcast
            || self.from == BROADCAST_SENDER
            || self.is_group
            || self.from.contains(GROUP_DOMAIN)
    }
}

/// Inbound call event from the session.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub id: String,
    pub peer_jid: String,
    pub is_video: bool,
}

/// Result of a successful outbound send.
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub id: String,
}

/// Event emitted by the session client onto the manager's channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status(SessionStatus),
    StateChange(ConnectionState),
    Message(IncomingMessage),
    Call(IncomingCall),
}
