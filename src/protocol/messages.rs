//! Message types for the dispatch core
//!
//! This module defines the outbound message envelope consumed by the sender,
//! the inbound command request/response pair, and the payload builders for
//! the periodically-produced messages.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::net::IpAddr;

/// Kind of outbound message, selecting the delivery channel at the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Point-in-time reading, sent on the telemetry channel
    Telemetry,
    /// Reported device state, sent on the property channel
    PropertyUpdate,
}

/// A single outbound message queued for delivery.
///
/// Immutable once enqueued; on a failed delivery attempt the same value is
/// re-enqueued at the tail of the outbound queue.
///
/// # Examples
/// ```
/// use fieldlink::protocol::OutboundMessage;
/// use serde_json::json;
///
/// let msg = OutboundMessage::telemetry(json!({"temperature": 21.4}));
/// assert!(msg.is_telemetry());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    /// Opaque serializable payload; the core never inspects it
    pub payload: Value,
}

impl OutboundMessage {
    /// Wrap a payload as a telemetry message
    pub fn telemetry(payload: Value) -> Self {
        Self {
            kind: MessageKind::Telemetry,
            payload,
        }
    }

    /// Wrap a payload as a reported-property update
    pub fn property_update(payload: Value) -> Self {
        Self {
            kind: MessageKind::PropertyUpdate,
            payload,
        }
    }

    pub fn is_telemetry(&self) -> bool {
        self.kind == MessageKind::Telemetry
    }
}

/// A remote-invoked command delivered by the session.
///
/// Owned by the dispatcher from receipt until exactly one [`CommandResponse`]
/// carrying the same correlation id has been produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    /// Command name used for handler routing
    pub name: String,
    /// Opaque command arguments
    #[serde(default)]
    pub payload: Value,
    /// Token correlating the response to this request
    pub correlation_id: String,
}

/// Terminal response to a [`CommandRequest`]; sent exactly once per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub correlation_id: String,
    /// HTTP-style status code: 2xx success, 404 unknown command, 500 handler failure
    pub code: u16,
    pub body: Value,
}

impl CommandResponse {
    /// Build the response for a request with the `{"status", "code"}` body shape
    pub fn for_request(request: &CommandRequest, status: impl Into<String>, code: u16) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            code,
            body: json!({ "status": status.into(), "code": code }),
        }
    }

    /// Attach a failure detail to the response body
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.body["detail"] = Value::String(detail.into());
        self
    }
}

/// Derived device health label carried in heartbeat messages.
///
/// Priority order when deriving from readiness flags:
/// `Error` > `AwaitingActuator` > `Ready`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceStatus {
    Error,
    AwaitingActuator,
    Ready,
}

impl DeviceStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            DeviceStatus::Error => "Error",
            DeviceStatus::AwaitingActuator => "AwaitingActuator",
            DeviceStatus::Ready => "Ready",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Heartbeat payload: the current readiness label
pub fn heartbeat_payload(status: DeviceStatus) -> Value {
    json!({ "status": status.as_label() })
}

/// One-shot device identity payload reported as a property update at startup
pub fn device_info_payload(device_id: &str, name: &str, ip: Option<IpAddr>) -> Value {
    json!({
        "id": device_id,
        "name": name,
        "ip": ip.map(|addr| addr.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_constructors() {
        let telemetry = OutboundMessage::telemetry(json!({"temperature": 20.0}));
        assert_eq!(telemetry.kind, MessageKind::Telemetry);
        assert!(telemetry.is_telemetry());

        let property = OutboundMessage::property_update(json!({"id": "dev-1"}));
        assert_eq!(property.kind, MessageKind::PropertyUpdate);
        assert!(!property.is_telemetry());
    }

    #[test]
    fn test_message_kind_serialization() {
        let telemetry = serde_json::to_string(&MessageKind::Telemetry).unwrap();
        assert_eq!(telemetry, "\"telemetry\"");

        let property = serde_json::to_string(&MessageKind::PropertyUpdate).unwrap();
        assert_eq!(property, "\"propertyUpdate\"");
    }

    #[test]
    fn test_command_request_payload_defaults_to_null() {
        let parsed: CommandRequest =
            serde_json::from_str(r#"{"name": "restart", "correlation_id": "abc"}"#).unwrap();
        assert_eq!(parsed.name, "restart");
        assert_eq!(parsed.payload, Value::Null);
        assert_eq!(parsed.correlation_id, "abc");
    }

    #[test]
    fn test_response_for_request_carries_correlation() {
        let request = CommandRequest {
            name: "restart".to_string(),
            payload: json!({"delay": 1}),
            correlation_id: "token-42".to_string(),
        };

        let response = CommandResponse::for_request(&request, "restarted", 200);

        assert_eq!(response.correlation_id, "token-42");
        assert_eq!(response.code, 200);
        assert_eq!(response.body, json!({"status": "restarted", "code": 200}));
    }

    #[test]
    fn test_response_with_detail() {
        let request = CommandRequest {
            name: "restart".to_string(),
            payload: Value::Null,
            correlation_id: "token-43".to_string(),
        };

        let response =
            CommandResponse::for_request(&request, "error", 500).with_detail("actuator busy");

        assert_eq!(response.body["status"], "error");
        assert_eq!(response.body["detail"], "actuator busy");
    }

    #[test]
    fn test_device_status_labels() {
        assert_eq!(DeviceStatus::Error.as_label(), "Error");
        assert_eq!(DeviceStatus::AwaitingActuator.as_label(), "AwaitingActuator");
        assert_eq!(DeviceStatus::Ready.as_label(), "Ready");
        assert_eq!(DeviceStatus::Ready.to_string(), "Ready");
    }

    #[test]
    fn test_heartbeat_payload_shape() {
        let payload = heartbeat_payload(DeviceStatus::AwaitingActuator);
        assert_eq!(payload, json!({"status": "AwaitingActuator"}));
    }

    #[test]
    fn test_device_info_payload_shape() {
        let payload =
            device_info_payload("field-001", "pump-house", Some("10.0.0.7".parse().unwrap()));
        assert_eq!(payload["id"], "field-001");
        assert_eq!(payload["name"], "pump-house");
        assert_eq!(payload["ip"], "10.0.0.7");

        let without_ip = device_info_payload("field-001", "pump-house", None);
        assert_eq!(without_ip["ip"], Value::Null);
    }
}
