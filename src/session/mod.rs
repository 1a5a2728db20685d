//! Session layer for the remote endpoint
//!
//! [`SessionClient`] is the narrow contract the core consumes; the MQTT
//! implementation lives in [`mqtt`] and the [`manager::ConnectionManager`]
//! serializes access to whichever client is injected.

use crate::protocol::{CommandRequest, CommandResponse};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod manager;
pub mod mqtt;

pub use manager::ConnectionManager;
pub use mqtt::MqttSession;

/// Connection state of the logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome of one bounded delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The session accepted the message within the timeout
    Delivered,
    /// The attempt exceeded its bound; the remote may still have received it
    TimedOut,
    /// The session rejected the message
    Failed(String),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Contract for the remote session client.
///
/// Implementations own the wire protocol and authentication; the core only
/// sees connect/send/respond semantics. `connect` performs a single handshake
/// attempt with no internal retry; the sender's outer loop drives retries.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// One handshake attempt; must be cheap to call when already connected
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Release the session; safe to call when never connected
    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Submit one telemetry payload
    async fn send_telemetry(&self, payload: &Value) -> Result<(), SessionError>;

    /// Submit one reported-property payload
    async fn send_property_update(&self, payload: &Value) -> Result<(), SessionError>;

    /// Submit one command response
    async fn send_command_response(&self, response: &CommandResponse) -> Result<(), SessionError>;

    /// Non-blocking connection check
    fn is_connected(&self) -> bool;

    /// Wire inbound command requests to the dispatcher channel
    fn set_command_sender(&mut self, sender: mpsc::UnboundedSender<CommandRequest>);
}
