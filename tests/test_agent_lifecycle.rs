//! Integration tests for the agent lifecycle
//!
//! Covers the bounded startup sequence, end-to-end message and command flow
//! with mock collaborators, and shutdown ordering: tasks stop on the running
//! flag, the session disconnects only after the grace period.


use fieldlink::actuator::SimulatedActuator;
use fieldlink::agent::DispatchAgent;
use fieldlink::error::DispatchError;
use fieldlink::protocol::CommandRequest;
use fieldlink::testing::mocks::{CountingSampler, MockProbe, MockSession};
use fieldlink::SessionClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

fn build_agent(session: MockSession, probe: MockProbe) -> DispatchAgent<MockSession> {
    DispatchAgent::new(
        test_helpers::test_config(),
        session,
        Arc::new(probe),
        Arc::new(SimulatedActuator),
        Arc::new(CountingSampler::new()),
    )
}

#[tokio::test]
async fn test_startup_fails_fast_without_network() {
    let mut agent = build_agent(MockSession::new(), MockProbe::always(false));

    let result = agent.start().await;

    assert!(matches!(result, Err(DispatchError::NetworkUnreachable)));
    assert!(!agent.is_running());
}

#[tokio::test]
async fn test_startup_fails_fast_without_session() {
    let session = MockSession::with_connect_failures(10);
    let mut agent = build_agent(session, MockProbe::always(true));

    let result = agent.start().await;

    assert!(matches!(
        result,
        Err(DispatchError::SessionConnectFailed { .. })
    ));
}

#[tokio::test]
async fn test_full_cycle_delivers_messages_and_answers_commands() {
    let session = MockSession::new();
    let twin = session.twin();
    let mut agent = build_agent(session, MockProbe::always(true));

    agent.start().await.expect("start should succeed");
    assert!(agent.is_running());

    // Startup identity report flows through the queue to the session
    let properties = twin.sent_properties();
    let mut got_info = false;
    for _ in 0..300 {
        if !properties.lock().await.is_empty() {
            got_info = true;
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(got_info, "device info property should be delivered");
    assert_eq!(properties.lock().await[0]["id"], "test-device");

    // Producers feed the sender: telemetry and heartbeat both arrive
    let telemetry = twin.sent_telemetry();
    let mut got_heartbeat = false;
    let mut got_sample = false;
    for _ in 0..500 {
        let sent = telemetry.lock().await;
        got_heartbeat = sent.iter().any(|p| p.get("status").is_some());
        got_sample = sent.iter().any(|p| p.get("seq").is_some());
        drop(sent);
        if got_heartbeat && got_sample {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(got_sample, "telemetry producer output should be delivered");
    assert!(got_heartbeat, "heartbeat producer output should be delivered");

    // Inbound command round-trips to a correlated response
    let responses = twin.sent_responses();
    assert!(
        twin.inject_command(CommandRequest {
            name: "doesNotExist".to_string(),
            payload: json!({}),
            correlation_id: "tok-e2e".to_string(),
        })
        .await,
        "command channel should be wired"
    );

    let mut answered = false;
    for _ in 0..300 {
        if !responses.lock().await.is_empty() {
            answered = true;
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(answered, "command should receive a response");
    let sent = responses.lock().await;
    assert_eq!(sent[0].correlation_id, "tok-e2e");
    assert_eq!(sent[0].code, 404);
    drop(sent);

    agent.shutdown().await;
    assert!(!agent.is_running());
    assert!(!twin.is_connected(), "shutdown must disconnect the session");
}

#[tokio::test]
async fn test_shutdown_waits_grace_period_before_disconnect() {
    let mut config = test_helpers::test_config();
    config.startup.shutdown_grace_secs = 1;

    let session = MockSession::new();
    let twin = session.twin();
    let mut agent = DispatchAgent::new(
        config,
        session,
        Arc::new(MockProbe::always(true)),
        Arc::new(SimulatedActuator),
        Arc::new(CountingSampler::new()),
    );

    agent.start().await.expect("start should succeed");

    let shutdown = tokio::spawn(async move {
        agent.shutdown().await;
        agent
    });

    // Inside the grace window the session must still be up
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        twin.is_connected(),
        "disconnect must wait for the grace period"
    );

    let agent = shutdown.await.unwrap();
    assert!(!twin.is_connected(), "disconnect after the grace period");
    assert!(!agent.is_running());
}

#[tokio::test]
async fn test_restart_command_dips_and_restores_readiness() {
    let session = MockSession::new();
    let twin = session.twin();
    let mut agent = build_agent(session, MockProbe::always(true));

    agent.start().await.expect("start should succeed");
    let readiness = agent.readiness();
    readiness.set_actuator_ready(true);

    assert!(
        twin.inject_command(CommandRequest {
            name: "restart".to_string(),
            payload: json!({"delay": 0, "reason": "integration"}),
            correlation_id: "tok-restart".to_string(),
        })
        .await
    );

    // Acknowledged with 200, then the dip, then recovery
    let responses = twin.sent_responses();
    let mut dipped = false;
    for _ in 0..500 {
        if !readiness.actuator_ready() {
            dipped = true;
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(dipped, "restart should clear readiness");

    let restart_response = responses
        .lock()
        .await
        .iter()
        .find(|r| r.correlation_id == "tok-restart")
        .cloned();
    let restart_response = restart_response.expect("response precedes the readiness dip");
    assert_eq!(restart_response.code, 200);
    assert_eq!(restart_response.body["status"], "restarted");

    let mut recovered = false;
    for _ in 0..1000 {
        if readiness.actuator_ready() {
            recovered = true;
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    assert!(recovered, "readiness should recover after the power cycle");

    agent.shutdown().await;
}
