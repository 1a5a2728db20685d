//! Connection manager
//!
//! Owns the single logical session and serializes all connect and disconnect
//! attempts behind an async mutex, so at most one handshake is ever in
//! flight. State is mirrored into a watch channel so `is_connected` never
//! touches the lock.

use super::{ConnectionState, SendOutcome, SessionClient, SessionError};
use crate::protocol::{CommandRequest, CommandResponse, MessageKind, OutboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info};

/// Serialized access to the injected [`SessionClient`].
///
/// Cheap to clone; all clones share the same session and state view.
#[derive(Debug)]
pub struct ConnectionManager<S: SessionClient> {
    client: Arc<Mutex<S>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl<S: SessionClient> Clone for ConnectionManager<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            state_tx: self.state_tx.clone(),
        }
    }
}

impl<S: SessionClient> ConnectionManager<S> {
    pub fn new(client: S) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client: Arc::new(Mutex::new(client)),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Ensure the session is connected.
    ///
    /// Idempotent: returns immediately when the session is already up.
    /// Otherwise performs exactly one handshake attempt under the lock.
    /// Failures are reported to the caller, never retried here.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut client = self.client.lock().await;

        if client.is_connected() {
            let _ = self.state_tx.send(ConnectionState::Connected);
            return Ok(());
        }

        let _ = self.state_tx.send(ConnectionState::Connecting);
        info!("Connecting session...");

        match client.connect().await {
            Ok(()) => {
                info!("Session connected");
                let _ = self.state_tx.send(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                error!("Session connect failed: {e}");
                let _ = self.state_tx.send(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Attempt one bounded delivery.
    ///
    /// The whole attempt, including waiting for the session lock, is capped
    /// at `timeout`; this call never blocks past it. A timed-out attempt is
    /// treated as a failure even if the remote eventually received the
    /// message (at-least-once delivery, duplicates possible).
    pub async fn send(&self, message: &OutboundMessage, timeout: Duration) -> SendOutcome {
        let attempt = async {
            let client = self.client.lock().await;
            match message.kind {
                MessageKind::Telemetry => client.send_telemetry(&message.payload).await,
                MessageKind::PropertyUpdate => client.send_property_update(&message.payload).await,
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(())) => {
                debug!("Message delivered");
                SendOutcome::Delivered
            }
            Ok(Err(e)) => {
                error!("Send failed: {e}");
                self.refresh_state().await;
                SendOutcome::Failed(e.to_string())
            }
            Err(_) => {
                error!("Send timed out after {timeout:?}");
                SendOutcome::TimedOut
            }
        }
    }

    /// Send a command response through the session
    pub async fn send_command_response(
        &self,
        response: &CommandResponse,
    ) -> Result<(), SessionError> {
        let client = self.client.lock().await;
        client.send_command_response(response).await
    }

    /// Non-blocking connection state read
    pub fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Wire inbound command requests to the dispatcher channel
    pub async fn register_command_sender(&self, sender: mpsc::UnboundedSender<CommandRequest>) {
        let mut client = self.client.lock().await;
        client.set_command_sender(sender);
    }

    /// Release the session; safe to call when never connected
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let mut client = self.client.lock().await;
        let result = client.disconnect().await;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        result
    }

    /// Re-read the client's view of the connection after a failure
    async fn refresh_state(&self) {
        let client = self.client.lock().await;
        let state = if client.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let _ = self.state_tx.send(state);
    }
}
