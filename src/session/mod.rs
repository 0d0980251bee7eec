//! WhatsApp session layer: typed events, the client seam, the sidecar
//! bridge implementation and the lifecycle manager.

pub mod bridge;
pub mod client;
pub mod manager;
pub mod types;

pub use bridge::BridgeClient;
pub use client::{SessionClient, SessionHandle};
pub use manager::{SessionManager, SessionManagerConfig};
