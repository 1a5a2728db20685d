//! Actuator control
//!
//! The restart command power-cycles a subordinate device through this seam.
//! The real relay driver is hardware glue outside this crate; deployments
//! inject their own implementation, and the simulated one keeps the timing
//! contract for bench runs.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Restart-capable subordinate device
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Cut power, hold for `off_duration`, then restore it.
    ///
    /// Blocking by contract: returns only after power is back on.
    async fn power_cycle(&self, off_duration: Duration);
}

/// Actuator that only logs and waits, for deployments without hardware
#[derive(Debug, Default)]
pub struct SimulatedActuator;

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn power_cycle(&self, off_duration: Duration) {
        info!("Powering off the subordinate device");
        tokio::time::sleep(off_duration).await;
        info!("Powering on the subordinate device");
    }
}
