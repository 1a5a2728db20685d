//! MQTT implementation of the session client
//!
//! One `connect()` call performs one handshake: a fresh client and event
//! loop are created, the event loop task confirms the ConnAck and subscribes
//! to the command-request topic, and any later event-loop error simply marks
//! the session disconnected. Reconnection policy lives in the sender's outer
//! loop, not here.

use super::{ConnectionState, SessionClient, SessionError};
use crate::config::CloudSection;
use crate::protocol::{CommandRequest, CommandResponse, TopicBuilder};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// MQTT-backed session client
pub struct MqttSession {
    device_id: String,
    config: CloudSection,
    connect_timeout: Duration,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    command_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<CommandRequest>>>>,
}

impl MqttSession {
    /// Create a session client; the broker URL is validated eagerly,
    /// the first network activity happens in `connect()`.
    pub fn new(
        device_id: &str,
        config: CloudSection,
        connect_timeout: Duration,
    ) -> Result<Self, SessionError> {
        Url::parse(&config.broker_url)
            .map_err(|_| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            device_id: device_id.to_string(),
            config,
            connect_timeout,
            client: None,
            event_loop_handle: None,
            state_tx: Arc::new(state_tx),
            command_tx: Arc::new(StdMutex::new(None)),
        })
    }

    /// Wait until the event loop confirms the handshake or the timeout expires
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let wait = async {
            loop {
                let state = *state_rx.borrow();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => {
                        return Err(SessionError::ConnectFailed(
                            "session closed during handshake".to_string(),
                        ))
                    }
                    ConnectionState::Connecting => {
                        if state_rx.changed().await.is_err() {
                            return Err(SessionError::ConnectFailed(
                                "state channel closed".to_string(),
                            ));
                        }
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectFailed(format!(
                "no connection confirmation within {timeout:?}"
            ))),
        }
    }

    fn publishable_client(&self) -> Result<&AsyncClient, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected {
                state: *self.state_tx.borrow(),
            });
        }
        self.client.as_ref().ok_or(SessionError::NotConnected {
            state: ConnectionState::Disconnected,
        })
    }

    async fn publish_json(&self, topic: String, payload: &Value) -> Result<(), SessionError> {
        let client = self.publishable_client()?;
        let body = serde_json::to_vec(payload).map_err(SessionError::Serialization)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await
            .map_err(|e| SessionError::PublishFailed(e.to_string()))
    }
}

#[async_trait]
impl SessionClient for MqttSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }

        // Stale event loop from a failed handshake must not keep publishing state
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }

        let options = configure_mqtt_options(&self.device_id, &self.config)?;
        let (client, mut event_loop) = AsyncClient::new(options, 10);

        let _ = self.state_tx.send(ConnectionState::Connecting);

        let state_tx = self.state_tx.clone();
        let command_tx = self.command_tx.clone();
        let request_topic = TopicBuilder::command_request_topic(&self.device_id);
        let subscribe_client = client.clone();
        let device_id = self.device_id.clone();

        let handle = tokio::spawn(async move {
            debug!("Session event loop started for device: {device_id}");
            loop {
                match event_loop.poll().await {
                    Ok(event) => match route_event(&event) {
                        SessionEvent::ConnectionAcknowledged => {
                            let _ = state_tx.send(ConnectionState::Connected);
                            if let Err(e) = subscribe_client
                                .subscribe(&request_topic, QoS::AtLeastOnce)
                                .await
                            {
                                error!("Failed to subscribe to {request_topic}: {e}");
                            } else {
                                debug!("Subscribed to command topic: {request_topic}");
                            }
                        }
                        SessionEvent::MessageReceived {
                            topic,
                            payload,
                            retain,
                        } => {
                            if !should_process_message(&topic, retain, &request_topic) {
                                continue;
                            }
                            match parse_command_request(&payload) {
                                Ok(request) => forward_command(&command_tx, request),
                                Err(e) => error!("Failed to parse command request: {e}"),
                            }
                        }
                        SessionEvent::Disconnected => {
                            info!("Broker closed the session for device: {device_id}");
                            let _ = state_tx.send(ConnectionState::Disconnected);
                            break;
                        }
                        SessionEvent::Other => {}
                    },
                    Err(e) => {
                        error!("Session event loop error for device {device_id}: {e}");
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        break;
                    }
                }
            }
            debug!("Session event loop stopped for device: {device_id}");
        });
        self.event_loop_handle = Some(handle);

        let confirmed =
            Self::wait_for_connection_confirmation(self.state_tx.subscribe(), self.connect_timeout)
                .await;

        if let Err(e) = confirmed {
            if let Some(handle) = self.event_loop_handle.take() {
                handle.abort();
            }
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return Err(e);
        }

        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!("Disconnect on closed session: {e}");
            }
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        info!("Session disconnected");
        Ok(())
    }

    async fn send_telemetry(&self, payload: &Value) -> Result<(), SessionError> {
        self.publish_json(TopicBuilder::telemetry_topic(&self.device_id), payload)
            .await
    }

    async fn send_property_update(&self, payload: &Value) -> Result<(), SessionError> {
        self.publish_json(TopicBuilder::property_topic(&self.device_id), payload)
            .await
    }

    async fn send_command_response(&self, response: &CommandResponse) -> Result<(), SessionError> {
        let client = self.publishable_client()?;
        let body = serde_json::to_vec(response).map_err(SessionError::Serialization)?;
        client
            .publish(
                TopicBuilder::command_response_topic(&self.device_id),
                QoS::AtLeastOnce,
                false,
                body,
            )
            .await
            .map_err(|e| SessionError::PublishFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    fn set_command_sender(&mut self, sender: mpsc::UnboundedSender<CommandRequest>) {
        if let Ok(mut slot) = self.command_tx.lock() {
            *slot = Some(sender);
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Build MQTT options from the cloud section
pub fn configure_mqtt_options(
    device_id: &str,
    config: &CloudSection,
) -> Result<MqttOptions, SessionError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    // Unique client id per connection attempt so the broker never sees a
    // takeover race between an old half-closed session and the new one
    let client_id = format!(
        "device-{device_id}-{}",
        chrono::Utc::now().timestamp_millis()
    );
    let mut options = MqttOptions::new(client_id, host, port);

    if url.scheme() == "mqtts" {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        options.set_credentials(&username, &password);
    }

    options.set_keep_alive(Duration::from_secs(60));

    Ok(options)
}

/// Routing decision for one MQTT event
#[derive(Debug, Clone)]
pub(crate) enum SessionEvent {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    Other,
}

/// Classify an MQTT event (pure function)
pub(crate) fn route_event(event: &Event) -> SessionEvent {
    match event {
        Event::Incoming(incoming) => {
            use rumqttc::v5::mqttbytes::v5::Packet;
            match incoming {
                Packet::ConnAck(_) => SessionEvent::ConnectionAcknowledged,
                Packet::Publish(publish) => SessionEvent::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => SessionEvent::Disconnected,
                _ => SessionEvent::Other,
            }
        }
        Event::Outgoing(_) => SessionEvent::Other,
    }
}

/// Whether an inbound publish should reach the dispatcher (pure function).
///
/// Retained messages are skipped so a replayed command cannot re-execute
/// after a reconnect.
pub(crate) fn should_process_message(topic: &str, retain: bool, expected_topic: &str) -> bool {
    if retain {
        debug!("Ignoring retained message on topic: {topic}");
        return false;
    }

    if topic != expected_topic {
        debug!("Topic mismatch: expected {expected_topic}, got {topic}");
        return false;
    }

    true
}

#[derive(Deserialize)]
struct WireCommand {
    name: String,
    #[serde(default)]
    payload: Value,
    correlation_id: Option<String>,
}

/// Parse an inbound command payload (pure function).
///
/// A request without a correlation id still gets exactly one response; the
/// token is minted here so correlation holds end to end.
pub(crate) fn parse_command_request(payload: &[u8]) -> Result<CommandRequest, String> {
    let wire: WireCommand = serde_json::from_slice(payload)
        .map_err(|e| format!("invalid command payload: {e}"))?;

    Ok(CommandRequest {
        name: wire.name,
        payload: wire.payload,
        correlation_id: wire
            .correlation_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    })
}

fn forward_command(
    command_tx: &Arc<StdMutex<Option<mpsc::UnboundedSender<CommandRequest>>>>,
    request: CommandRequest,
) {
    let sender = match command_tx.lock() {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };

    match sender {
        Some(tx) => {
            info!("Received command: {}", request.name);
            if tx.send(request).is_err() {
                warn!("Command dispatcher stopped - inbound command dropped");
            }
        }
        None => {
            warn!("Received command but no dispatcher wired - command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet, Publish};
    use serde_json::json;

    fn test_cloud_section() -> CloudSection {
        CloudSection {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
            connect_timeout_secs: 30,
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options("test-device", &test_cloud_section());
        assert!(options.is_ok());
    }

    #[test]
    fn test_invalid_broker_url() {
        let mut config = test_cloud_section();
        config.broker_url = "not a url".to_string();

        let result = configure_mqtt_options("test-device", &config);
        assert!(matches!(result, Err(SessionError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let mut config = test_cloud_section();
        config.broker_url = "::".to_string();

        let result = MqttSession::new("test-device", config, Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_command_request() {
        let payload =
            br#"{"name": "restart", "payload": {"delay": 2}, "correlation_id": "tok-1"}"#;
        let request = parse_command_request(payload).unwrap();
        assert_eq!(request.name, "restart");
        assert_eq!(request.payload, json!({"delay": 2}));
        assert_eq!(request.correlation_id, "tok-1");
    }

    #[test]
    fn test_parse_command_request_mints_missing_correlation_id() {
        let request = parse_command_request(br#"{"name": "restart"}"#).unwrap();
        assert_eq!(request.name, "restart");
        assert!(!request.correlation_id.is_empty());
    }

    #[test]
    fn test_parse_command_request_rejects_garbage() {
        assert!(parse_command_request(b"not json").is_err());
        assert!(parse_command_request(br#"{"payload": {}}"#).is_err());
    }

    #[test]
    fn test_should_process_message() {
        let topic = "/devices/test/commands/request";

        assert!(should_process_message(topic, false, topic));
        assert!(!should_process_message(topic, true, topic));
        assert!(!should_process_message("/other/topic", false, topic));
    }

    #[test]
    fn test_route_event() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            route_event(&connack),
            SessionEvent::ConnectionAcknowledged
        ));

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("/devices/test/commands/request"),
            pkid: 1,
            payload: Bytes::from(r#"{"name": "restart"}"#),
            properties: None,
        }));
        if let SessionEvent::MessageReceived {
            topic,
            payload,
            retain,
        } = route_event(&publish)
        {
            assert_eq!(topic, "/devices/test/commands/request");
            assert_eq!(payload, br#"{"name": "restart"}"#);
            assert!(!retain);
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let session =
            MqttSession::new("test-device", test_cloud_section(), Duration::from_secs(1)).unwrap();
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_sends_fail_without_connection() {
        let session =
            MqttSession::new("test-device", test_cloud_section(), Duration::from_secs(1)).unwrap();

        assert!(session.send_telemetry(&json!({})).await.is_err());
        assert!(session.send_property_update(&json!({})).await.is_err());

        let response = CommandResponse {
            correlation_id: "tok".to_string(),
            code: 200,
            body: json!({}),
        };
        assert!(session.send_command_response(&response).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut session =
            MqttSession::new("test-device", test_cloud_section(), Duration::from_secs(1)).unwrap();
        assert!(session.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_forward_command_without_sender_drops() {
        let slot = Arc::new(StdMutex::new(None));
        // Must not panic when no dispatcher is wired
        forward_command(
            &slot,
            CommandRequest {
                name: "restart".to_string(),
                payload: Value::Null,
                correlation_id: "tok".to_string(),
            },
        );
    }

    #[tokio::test]
    async fn test_forward_command_reaches_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = Arc::new(StdMutex::new(Some(tx)));

        forward_command(
            &slot,
            CommandRequest {
                name: "restart".to_string(),
                payload: json!({"delay": 1}),
                correlation_id: "tok".to_string(),
            },
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name, "restart");
        assert_eq!(received.correlation_id, "tok");
    }
}
