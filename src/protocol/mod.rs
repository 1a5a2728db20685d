//! Message and topic types for device-to-cloud communication
//!
//! This module defines the data model shared by the outbound dispatch path
//! (telemetry and property updates) and the inbound command path.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
