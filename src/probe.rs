//! Network reachability probe
//!
//! The sender never attempts a session operation while the network is down;
//! it polls this probe instead. The TCP implementation opens a short-lived
//! connection to a well-known host, which exercises DNS and routing in one
//! bounded step.

use crate::config::NetworkSection;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Bounded-latency reachability check
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that opens a TCP connection to `host:port`
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Build from the network section; the probe timeout is capped at the
    /// check interval so a dead network cannot stall the sender for longer
    /// than one polling period.
    pub fn from_config(network: &NetworkSection) -> Self {
        Self::new(
            network.probe_host.clone(),
            network.probe_port,
            Duration::from_secs(network.check_interval_secs),
        )
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Network probe to {addr} failed: {e}");
                false
            }
            Err(_) => {
                debug!("Network probe to {addr} timed out");
                false
            }
        }
    }
}

/// Best-effort local IP discovery for the startup device-info report.
///
/// Routing a UDP socket toward a public address selects the outbound
/// interface without sending any packet.
pub fn local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
