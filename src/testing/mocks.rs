//! Mock implementations of the external collaborators
//!
//! Provides mock session, probe, actuator, and sampler implementations with
//! recorded interactions and scriptable failures, so the retry and response
//! contracts can be tested deterministically.

use crate::actuator::Actuator;
use crate::probe::NetworkProbe;
use crate::producer::TelemetrySampler;
use crate::protocol::{CommandRequest, CommandResponse};
use crate::session::{ConnectionState, SessionClient, SessionError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Mock session client for testing
#[derive(Debug, Default)]
pub struct MockSession {
    connected: Arc<AtomicBool>,
    handshake_count: Arc<Mutex<u32>>,
    connect_failures_remaining: Arc<Mutex<u32>>,
    send_failures_remaining: Arc<Mutex<u32>>,
    send_delay: Arc<Mutex<Option<Duration>>>,
    sent_telemetry: Arc<Mutex<Vec<Value>>>,
    sent_properties: Arc<Mutex<Vec<Value>>>,
    sent_responses: Arc<Mutex<Vec<CommandResponse>>>,
    command_tx: Arc<Mutex<Option<mpsc::UnboundedSender<CommandRequest>>>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` connect attempts, then succeed
    pub fn with_connect_failures(count: u32) -> Self {
        let session = Self::default();
        // Fresh mutex, the lock cannot be contended yet
        if let Ok(mut failures) = session.connect_failures_remaining.try_lock() {
            *failures = count;
        }
        session
    }

    /// Fail the next `count` send attempts, then succeed
    pub fn with_send_failures(self, count: u32) -> Self {
        if let Ok(mut failures) = self.send_failures_remaining.try_lock() {
            *failures = count;
        }
        self
    }

    /// Delay every send by `delay`, for exercising timeouts
    pub fn with_send_delay(self, delay: Duration) -> Self {
        if let Ok(mut slot) = self.send_delay.try_lock() {
            *slot = Some(delay);
        }
        self
    }

    /// A handle sharing all recorded state with this session.
    ///
    /// Useful after the session has been consumed by a manager.
    pub fn twin(&self) -> Self {
        Self {
            connected: self.connected.clone(),
            handshake_count: self.handshake_count.clone(),
            connect_failures_remaining: self.connect_failures_remaining.clone(),
            send_failures_remaining: self.send_failures_remaining.clone(),
            send_delay: self.send_delay.clone(),
            sent_telemetry: self.sent_telemetry.clone(),
            sent_properties: self.sent_properties.clone(),
            sent_responses: self.sent_responses.clone(),
            command_tx: self.command_tx.clone(),
        }
    }

    pub fn handshake_count(&self) -> Arc<Mutex<u32>> {
        self.handshake_count.clone()
    }

    pub fn sent_telemetry(&self) -> Arc<Mutex<Vec<Value>>> {
        self.sent_telemetry.clone()
    }

    pub fn sent_properties(&self) -> Arc<Mutex<Vec<Value>>> {
        self.sent_properties.clone()
    }

    pub fn sent_responses(&self) -> Arc<Mutex<Vec<CommandResponse>>> {
        self.sent_responses.clone()
    }

    /// Deliver a command as if the remote endpoint invoked it
    pub async fn inject_command(&self, request: CommandRequest) -> bool {
        match self.command_tx.lock().await.as_ref() {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    async fn common_send_path(&self) -> Result<(), SessionError> {
        let delay = *self.send_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.send_failures_remaining.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(SessionError::PublishFailed(
                    "scripted send failure".to_string(),
                ));
            }
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::NotConnected {
                state: ConnectionState::Disconnected,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl SessionClient for MockSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        *self.handshake_count.lock().await += 1;

        let mut failures = self.connect_failures_remaining.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(SessionError::ConnectFailed(
                "scripted connect failure".to_string(),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_telemetry(&self, payload: &Value) -> Result<(), SessionError> {
        self.common_send_path().await?;
        self.sent_telemetry.lock().await.push(payload.clone());
        Ok(())
    }

    async fn send_property_update(&self, payload: &Value) -> Result<(), SessionError> {
        self.common_send_path().await?;
        self.sent_properties.lock().await.push(payload.clone());
        Ok(())
    }

    async fn send_command_response(&self, response: &CommandResponse) -> Result<(), SessionError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::NotConnected {
                state: ConnectionState::Disconnected,
            });
        }
        self.sent_responses.lock().await.push(response.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_command_sender(&mut self, sender: mpsc::UnboundedSender<CommandRequest>) {
        if let Ok(mut slot) = self.command_tx.try_lock() {
            *slot = Some(sender);
        }
    }
}

/// Mock reachability probe with a scripted answer sequence
#[derive(Debug)]
pub struct MockProbe {
    script: Arc<Mutex<VecDeque<bool>>>,
    fallback: bool,
}

impl MockProbe {
    /// Probe that always answers `value`
    pub fn always(value: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: value,
        }
    }

    /// Probe that plays `values` in order, then answers `fallback`
    pub fn sequence(values: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(values.into_iter().collect())),
            fallback,
        }
    }
}

#[async_trait]
impl NetworkProbe for MockProbe {
    async fn is_reachable(&self) -> bool {
        self.script.lock().await.pop_front().unwrap_or(self.fallback)
    }
}

/// Mock actuator recording every power cycle
#[derive(Debug, Default)]
pub struct MockActuator {
    cycles: Arc<Mutex<Vec<Duration>>>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cycles(&self) -> Vec<Duration> {
        self.cycles.lock().await.clone()
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn power_cycle(&self, off_duration: Duration) {
        tokio::time::sleep(off_duration).await;
        self.cycles.lock().await.push(off_duration);
    }
}

/// Sampler producing sequence-numbered payloads, for order assertions
#[derive(Debug, Default)]
pub struct CountingSampler {
    counter: AtomicU64,
}

impl CountingSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySampler for CountingSampler {
    fn sample(&self) -> Value {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        json!({ "seq": n })
    }
}
