//! fieldlink - resilient device-to-cloud message dispatch
//!
//! A dispatch agent for connected field devices: telemetry and state updates
//! are produced on independent cadences, buffered in an unbounded FIFO, and
//! delivered at-least-once across intermittent connectivity; remote commands
//! are routed to handlers and answered with exactly one correlated response.
//!
//! # Overview
//!
//! - Producers enqueue without ever touching the network
//! - A single sender drains the queue, gated on a reachability probe and a
//!   lock-serialized session, re-enqueueing at the tail on any failure
//! - The command dispatcher survives handler failures and defers slow side
//!   effects (actuator power cycles) past its own acknowledgement
//!
//! # Quick Start
//!
//! ```rust
//! use fieldlink::protocol::{CommandRequest, CommandResponse, OutboundMessage};
//! use serde_json::json;
//!
//! // Messages are immutable once enqueued
//! let reading = OutboundMessage::telemetry(json!({
//!     "temperature": 21.4,
//!     "humidity": 48.2,
//! }));
//! assert!(reading.is_telemetry());
//!
//! // Every command request yields exactly one correlated response
//! let request = CommandRequest {
//!     name: "restart".to_string(),
//!     payload: json!({"delay": 5, "reason": "maintenance"}),
//!     correlation_id: "tok-1".to_string(),
//! };
//! let response = CommandResponse::for_request(&request, "restarted", 200);
//! assert_eq!(response.correlation_id, request.correlation_id);
//! ```

pub mod actuator;
pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod probe;
pub mod producer;
pub mod protocol;
pub mod queue;
pub mod readiness;
pub mod sender;
pub mod session;
pub mod testing;

pub use agent::DispatchAgent;
pub use config::*;
pub use error::{DispatchError, DispatchResult};
pub use protocol::*;
pub use readiness::ReadinessState;
pub use session::{ConnectionManager, MqttSession, SendOutcome, SessionClient};
