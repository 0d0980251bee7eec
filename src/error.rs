//! Gateway error taxonomy.
//!
//! Failures inside session event handling are contained where they happen
//! and logged; only reconnect exhaustion and startup failure are fatal.
//! Errors on the HTTP request path bubble up to the API layer, which maps
//! them onto responses.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Session handle creation failed. Re-raised to the startup caller
    /// after a reconnect has been scheduled.
    #[error("failed to initialize session client: {0}")]
    Initialization(#[source] anyhow::Error),

    /// The bounded reconnect budget is spent. The process must terminate.
    #[error("maximum reconnect attempts reached")]
    ReconnectExhausted,

    /// A send was attempted before any session handle exists.
    #[error("session client is not initialized")]
    NotInitialized,

    /// A send was attempted while the session is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// The session client failed to transmit an outbound message.
    #[error("failed to send message: {0}")]
    Send(#[source] anyhow::Error),
}
