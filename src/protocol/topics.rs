//! Topic construction and device ID validation
//!
//! Topics are device-scoped and canonicalized so that configuration typos
//! (duplicate or trailing slashes) cannot produce mismatched subscriptions.

use thiserror::Error;

pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

/// Device identifier validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
}

/// Device-scoped topic construction
pub struct TopicBuilder;

impl TopicBuilder {
    /// Telemetry publish topic: `/devices/{device_id}/telemetry`
    pub fn telemetry_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/telemetry"))
    }

    /// Reported-property publish topic: `/devices/{device_id}/properties/reported`
    pub fn property_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/properties/reported"))
    }

    /// Inbound command subscription topic: `/devices/{device_id}/commands/request`
    pub fn command_request_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/commands/request"))
    }

    /// Command response publish topic: `/devices/{device_id}/commands/response`
    pub fn command_response_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/commands/response"))
    }
}
