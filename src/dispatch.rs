//! Command dispatcher
//!
//! Single reader of the inbound command channel. Each request moves through
//! routing and execution and yields exactly one correlated response: unknown
//! names answer 404 synchronously, handler failures answer 500, and the
//! dispatcher itself survives every handler outcome. A handler may return a
//! deferred side effect; it is spawned only after the response has been
//! sent, so a slow actuator cycle never delays the acknowledgement.

use crate::actuator::Actuator;
use crate::error::{sanitize_remote_message, DispatchError};
use crate::protocol::{CommandRequest, CommandResponse};
use crate::readiness::ReadinessState;
use crate::session::{ConnectionManager, SessionClient};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Deferred work a handler schedules past its own response
pub type SideEffect = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Result of a successfully routed and executed command
pub struct CommandOutcome {
    pub status: String,
    pub code: u16,
    side_effect: Option<SideEffect>,
}

impl CommandOutcome {
    pub fn new(status: impl Into<String>, code: u16) -> Self {
        Self {
            status: status.into(),
            code,
            side_effect: None,
        }
    }

    /// Attach work to run on an independent task after the response is sent
    pub fn with_side_effect(
        mut self,
        effect: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        self.side_effect = Some(Box::pin(effect));
        self
    }
}

/// A named command implementation
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> Result<CommandOutcome, DispatchError>;
}

/// Routes inbound commands to handlers and emits correlated responses
pub struct CommandDispatcher<S: SessionClient> {
    manager: ConnectionManager<S>,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl<S: SessionClient + 'static> CommandDispatcher<S> {
    pub fn new(manager: ConnectionManager<S>) -> Self {
        Self {
            manager,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a command name
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Route and execute one request, always producing a response
    async fn process(&self, request: &CommandRequest) -> (CommandResponse, Option<SideEffect>) {
        debug!(
            "Processing command {} with payload {}",
            request.name, request.payload
        );

        match self.handlers.get(&request.name) {
            None => {
                warn!(
                    "{}",
                    DispatchError::CommandRoutingFailed {
                        name: request.name.clone(),
                    }
                );
                (
                    CommandResponse::for_request(request, "Unknown command", 404),
                    None,
                )
            }
            Some(handler) => match handler.handle(&request.payload).await {
                Ok(mut outcome) => {
                    let effect = outcome.side_effect.take();
                    (
                        CommandResponse::for_request(request, outcome.status, outcome.code),
                        effect,
                    )
                }
                Err(e) => {
                    error!("Processing error: {e}");
                    (
                        CommandResponse::for_request(request, "error", 500)
                            .with_detail(sanitize_remote_message(&e.to_string())),
                        None,
                    )
                }
            },
        }
    }

    /// Spawn the dispatcher task consuming the command channel
    pub fn spawn(
        self,
        mut command_rx: mpsc::UnboundedReceiver<CommandRequest>,
        mut running: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Command dispatcher ready...");

            loop {
                if !*running.borrow() {
                    break;
                }

                let request = tokio::select! {
                    _ = running.changed() => continue,
                    req = command_rx.recv() => match req {
                        Some(r) => r,
                        None => break,
                    },
                };

                let (response, side_effect) = self.process(&request).await;

                if let Err(e) = self.manager.send_command_response(&response).await {
                    error!(
                        "Failed to send response for command {}: {e}",
                        request.name
                    );
                }

                if let Some(effect) = side_effect {
                    tokio::spawn(effect);
                }

                info!("Completed command {}", request.name);
            }
            info!("Command dispatcher stopped");
        })
    }
}

/// Built-in `restart` handler.
///
/// Acknowledges immediately; the readiness dip, optional delay, and actuator
/// power cycle all run after the response on an independent task.
pub struct RestartHandler {
    actuator: Arc<dyn Actuator>,
    readiness: Arc<ReadinessState>,
    power_off_delay: Duration,
}

impl RestartHandler {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        readiness: Arc<ReadinessState>,
        power_off_delay: Duration,
    ) -> Self {
        Self {
            actuator,
            readiness,
            power_off_delay,
        }
    }
}

#[async_trait]
impl CommandHandler for RestartHandler {
    async fn handle(&self, payload: &Value) -> Result<CommandOutcome, DispatchError> {
        let delay_secs = payload
            .get("delay")
            .and_then(Value::as_f64)
            .filter(|d| *d >= 0.0)
            .unwrap_or(0.0);
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string();

        info!("Restart command received");
        debug!("Restarting in {delay_secs} seconds. Reason: {reason}");

        let actuator = self.actuator.clone();
        let readiness = self.readiness.clone();
        let off_duration = self.power_off_delay;
        let delay = Duration::from_secs_f64(delay_secs);

        Ok(CommandOutcome::new("restarted", 200).with_side_effect(async move {
            readiness.set_actuator_ready(false);
            tokio::time::sleep(delay).await;
            actuator.power_cycle(off_duration).await;
            readiness.set_actuator_ready(true);
            debug!("Actuator restarted and ready");
        }))
    }
}
