//! Shared readiness state
//!
//! Process-wide flags reflecting actuator readiness and error condition,
//! written by command handlers and actuator-cycle routines, read by the
//! heartbeat producer. Atomics give every task a consistent view without a
//! lock; `status()` stays a pure derivation over the two flags.

use crate::protocol::DeviceStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared readiness flags; clone the `Arc`-wrapped handle freely across tasks
#[derive(Debug)]
pub struct ReadinessState {
    actuator_ready: AtomicBool,
    error_flag: AtomicBool,
}

impl ReadinessState {
    /// New state with the actuator not yet ready and no error
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            actuator_ready: AtomicBool::new(false),
            error_flag: AtomicBool::new(false),
        })
    }

    pub fn actuator_ready(&self) -> bool {
        self.actuator_ready.load(Ordering::SeqCst)
    }

    pub fn set_actuator_ready(&self, ready: bool) {
        self.actuator_ready.store(ready, Ordering::SeqCst);
    }

    pub fn error_flag(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn set_error_flag(&self, error: bool) {
        self.error_flag.store(error, Ordering::SeqCst);
    }

    /// Derive the device status label.
    ///
    /// Evaluation priority: error flag first, then actuator readiness.
    pub fn status(&self) -> DeviceStatus {
        derive_status(self.error_flag(), self.actuator_ready())
    }
}

/// Pure derivation of the status label from the two flags
pub fn derive_status(error_flag: bool, actuator_ready: bool) -> DeviceStatus {
    if error_flag {
        DeviceStatus::Error
    } else if !actuator_ready {
        DeviceStatus::AwaitingActuator
    } else {
        DeviceStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_truth_table() {
        assert_eq!(derive_status(true, true), DeviceStatus::Error);
        assert_eq!(derive_status(true, false), DeviceStatus::Error);
        assert_eq!(derive_status(false, false), DeviceStatus::AwaitingActuator);
        assert_eq!(derive_status(false, true), DeviceStatus::Ready);
    }

    #[test]
    fn test_initial_state_awaits_actuator() {
        let state = ReadinessState::new();
        assert!(!state.actuator_ready());
        assert!(!state.error_flag());
        assert_eq!(state.status(), DeviceStatus::AwaitingActuator);
    }

    #[test]
    fn test_error_flag_takes_priority() {
        let state = ReadinessState::new();
        state.set_actuator_ready(true);
        assert_eq!(state.status(), DeviceStatus::Ready);

        state.set_error_flag(true);
        assert_eq!(state.status(), DeviceStatus::Error);

        state.set_error_flag(false);
        assert_eq!(state.status(), DeviceStatus::Ready);
    }

    #[test]
    fn test_shared_across_tasks() {
        let state = ReadinessState::new();
        let writer = state.clone();

        std::thread::spawn(move || {
            writer.set_actuator_ready(true);
        })
        .join()
        .unwrap();

        assert_eq!(state.status(), DeviceStatus::Ready);
    }
}
