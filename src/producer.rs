//! Periodic message producers
//!
//! The telemetry producer and the heartbeat producer each run on their own
//! tokio task with their own cadence. A tick enqueues one message and never
//! touches the network; the queue absorbs any backlog while the sender is
//! blocked on connectivity. Missed ticks are skipped rather than replayed,
//! so a long stall compresses into one fresh sample instead of a burst.

use crate::protocol::{heartbeat_payload, OutboundMessage};
use crate::queue::QueueSender;
use crate::readiness::ReadinessState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Source of telemetry readings
pub trait TelemetrySampler: Send + Sync {
    fn sample(&self) -> Value;
}

/// Sampler producing synthetic temperature/humidity readings
#[derive(Debug, Default)]
pub struct SimulatedSampler;

impl TelemetrySampler for SimulatedSampler {
    fn sample(&self) -> Value {
        let frac = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_millis() as f64
            / 1000.0;
        json!({
            "temperature": round2(20.0 + 10.0 * (0.5 - frac)),
            "humidity": round2(50.0 + 20.0 * (0.5 - frac)),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Spawn the telemetry producer task
pub fn spawn_telemetry_producer(
    sampler: Arc<dyn TelemetrySampler>,
    queue: QueueSender,
    interval: Duration,
    mut running: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if !*running.borrow() {
                break;
            }
            tokio::select! {
                _ = running.changed() => {
                    if !*running.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let payload = sampler.sample();
                    debug!("Queuing telemetry: {payload}");
                    if !queue.enqueue(OutboundMessage::telemetry(payload)) {
                        break;
                    }
                }
            }
        }
        info!("Telemetry producer stopped");
    })
}

/// Spawn the heartbeat producer task.
///
/// Each tick reduces the readiness flags to a status label and enqueues it.
pub fn spawn_heartbeat_producer(
    readiness: Arc<ReadinessState>,
    queue: QueueSender,
    interval: Duration,
    mut running: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if !*running.borrow() {
                break;
            }
            tokio::select! {
                _ = running.changed() => {
                    if !*running.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let payload = heartbeat_payload(readiness.status());
                    debug!("Queuing heartbeat: {payload}");
                    if !queue.enqueue(OutboundMessage::telemetry(payload)) {
                        break;
                    }
                }
            }
        }
        info!("Heartbeat producer stopped");
    })
}
