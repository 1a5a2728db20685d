//! Agent lifecycle
//!
//! Wires the injected collaborators together, performs the bounded startup
//! sequence, runs the four steady-state tasks, and coordinates cooperative
//! shutdown. Startup is the one place retries are bounded and failure is
//! fatal; once running, every failure recovers locally inside its task.

use crate::actuator::Actuator;
use crate::config::AgentConfig;
use crate::dispatch::{CommandDispatcher, RestartHandler};
use crate::error::{DispatchError, DispatchResult};
use crate::probe::{local_ip, NetworkProbe};
use crate::producer::{spawn_heartbeat_producer, spawn_telemetry_producer, TelemetrySampler};
use crate::protocol::{device_info_payload, OutboundMessage};
use crate::queue::{outbound_queue, QueueSender};
use crate::readiness::ReadinessState;
use crate::sender::spawn_sender;
use crate::session::{ConnectionManager, SessionClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Dispatch agent with injected collaborators
pub struct DispatchAgent<S: SessionClient + 'static> {
    config: AgentConfig,
    manager: ConnectionManager<S>,
    probe: Arc<dyn NetworkProbe>,
    actuator: Arc<dyn Actuator>,
    sampler: Arc<dyn TelemetrySampler>,
    readiness: Arc<ReadinessState>,
    running_tx: watch::Sender<bool>,
    queue_tx: Option<QueueSender>,
    task_handles: Vec<JoinHandle<()>>,
}

impl<S: SessionClient + 'static> DispatchAgent<S> {
    pub fn new(
        config: AgentConfig,
        session: S,
        probe: Arc<dyn NetworkProbe>,
        actuator: Arc<dyn Actuator>,
        sampler: Arc<dyn TelemetrySampler>,
    ) -> Self {
        let (running_tx, _) = watch::channel(false);
        Self {
            config,
            manager: ConnectionManager::new(session),
            probe,
            actuator,
            sampler,
            readiness: ReadinessState::new(),
            running_tx,
            queue_tx: None,
            task_handles: Vec::new(),
        }
    }

    /// Start the agent: bounded startup checks, then the steady-state tasks.
    ///
    /// Returns an error when the network or the session cannot be reached
    /// within the configured bounds; the caller is expected to treat that
    /// as fatal rather than hang forever with no observable state.
    pub async fn start(&mut self) -> DispatchResult<()> {
        info!("Starting dispatch agent: {}", self.config.device.id);

        self.await_network_at_startup().await?;
        self.connect_at_startup().await?;

        // Inbound command channel: session -> dispatcher, single reader
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.manager.register_command_sender(command_tx).await;

        let (queue_tx, queue_rx) = outbound_queue();

        // One-shot identity report ahead of the first telemetry
        let info_payload = device_info_payload(
            &self.config.device.id,
            &self.config.device.name,
            local_ip(),
        );
        queue_tx.enqueue(OutboundMessage::property_update(info_payload));

        let _ = self.running_tx.send(true);

        self.task_handles.push(spawn_telemetry_producer(
            self.sampler.clone(),
            queue_tx.clone(),
            self.config.telemetry_interval(),
            self.running_tx.subscribe(),
        ));
        self.task_handles.push(spawn_heartbeat_producer(
            self.readiness.clone(),
            queue_tx.clone(),
            self.config.heartbeat_interval(),
            self.running_tx.subscribe(),
        ));
        self.task_handles.push(spawn_sender(
            self.manager.clone(),
            queue_rx,
            queue_tx.clone(),
            self.probe.clone(),
            self.config.check_interval(),
            self.config.send_retry_interval(),
            self.running_tx.subscribe(),
        ));

        let dispatcher = CommandDispatcher::new(self.manager.clone()).with_handler(
            "restart",
            Arc::new(RestartHandler::new(
                self.actuator.clone(),
                self.readiness.clone(),
                self.config.power_off_delay(),
            )),
        );
        self.task_handles
            .push(dispatcher.spawn(command_rx, self.running_tx.subscribe()));

        self.queue_tx = Some(queue_tx);
        info!("System ready.");
        Ok(())
    }

    /// Graceful shutdown: clear the running flag, allow in-flight sends the
    /// grace period, then force the session disconnect.
    pub async fn shutdown(&mut self) {
        info!("Shutdown initiated");
        let _ = self.running_tx.send(false);

        tokio::time::sleep(self.config.shutdown_grace()).await;

        if let Err(e) = self.manager.disconnect().await {
            warn!("Error during disconnect: {e}");
        }

        for mut handle in self.task_handles.drain(..) {
            match tokio::time::timeout(Duration::from_secs(1), &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("Task did not stop within the join window, aborting");
                    handle.abort();
                }
            }
        }

        info!("Dispatch agent stopped");
    }

    async fn await_network_at_startup(&self) -> DispatchResult<()> {
        let max_checks = self.config.startup.max_network_checks.max(1);
        for attempt in 1..=max_checks {
            if self.probe.is_reachable().await {
                return Ok(());
            }
            warn!("Network unreachable (attempt {attempt}/{max_checks})");
            if attempt < max_checks {
                tokio::time::sleep(self.config.check_interval()).await;
            }
        }

        error!("Could not reach network during startup");
        Err(DispatchError::NetworkUnreachable)
    }

    async fn connect_at_startup(&self) -> DispatchResult<()> {
        let max_attempts = self.config.startup.max_connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.manager.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Startup connect failed (attempt {attempt}/{max_attempts}): {e}");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.check_interval()).await;
                    }
                }
            }
        }

        error!("Could not establish session during startup");
        Err(DispatchError::connect_failed(last_error))
    }

    /// Whether the steady-state tasks are running
    pub fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Shared readiness handle, as written by command handlers
    pub fn readiness(&self) -> Arc<ReadinessState> {
        self.readiness.clone()
    }

    /// Enqueue handle for the outbound queue, available after `start()`
    pub fn queue_sender(&self) -> Option<QueueSender> {
        self.queue_tx.clone()
    }

    /// The connection manager owning the session
    pub fn manager(&self) -> &ConnectionManager<S> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedActuator;
    use crate::testing::mocks::{CountingSampler, MockProbe, MockSession};

    fn fast_config() -> AgentConfig {
        let mut config = AgentConfig::test_config();
        config.startup.max_network_checks = 1;
        config.startup.max_connect_attempts = 1;
        config.startup.shutdown_grace_secs = 0;
        config
    }

    fn build_agent(session: MockSession, probe: MockProbe) -> DispatchAgent<MockSession> {
        DispatchAgent::new(
            fast_config(),
            session,
            Arc::new(probe),
            Arc::new(SimulatedActuator),
            Arc::new(CountingSampler::new()),
        )
    }

    #[tokio::test]
    async fn test_start_fails_when_network_never_reachable() {
        let mut agent = build_agent(MockSession::new(), MockProbe::always(false));

        let result = agent.start().await;

        assert!(matches!(result, Err(DispatchError::NetworkUnreachable)));
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn test_start_fails_when_session_never_connects() {
        // More scripted failures than the startup budget allows
        let session = MockSession::with_connect_failures(10);
        let mut agent = build_agent(session, MockProbe::always(true));

        let result = agent.start().await;

        assert!(matches!(
            result,
            Err(DispatchError::SessionConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_spawns_tasks_and_reports_running() {
        let session = MockSession::new();
        let mut agent = build_agent(session, MockProbe::always(true));

        agent.start().await.expect("start should succeed");

        assert!(agent.is_running());
        assert!(agent.queue_sender().is_some());
        assert!(agent.manager().is_connected());

        agent.shutdown().await;
        assert!(!agent.is_running());
    }

    #[tokio::test]
    async fn test_startup_enqueues_device_info_property() {
        let session = MockSession::new();
        let properties = session.sent_properties();
        let mut agent = build_agent(session, MockProbe::always(true));

        agent.start().await.unwrap();

        // The sender drains the one-shot identity report
        let mut delivered = false;
        for _ in 0..50 {
            if !properties.lock().await.is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered, "device info property should be delivered");
        let sent = properties.lock().await;
        assert_eq!(sent[0]["id"], "test-device");
        assert_eq!(sent[0]["name"], "bench unit");

        drop(sent);
        agent.shutdown().await;
    }
}
