//! Configuration system for the dispatch agent
//!
//! Loads an immutable snapshot from a TOML file at startup. Invalid interval
//! values are reported and replaced with their defaults rather than
//! rejecting the whole file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Immutable agent configuration snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub device: DeviceSection,
    pub cloud: CloudSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub actuator: ActuatorSection,
    #[serde(default)]
    pub startup: StartupSection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Human-readable device name, reported in the startup property update
    #[serde(default)]
    pub name: String,
}

/// Remote endpoint connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudSection {
    /// Broker URL with protocol and port, e.g. `mqtt://host:1883`
    pub broker_url: String,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// Handshake confirmation timeout in seconds (default: 30)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Producer cadences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Telemetry sampling interval in seconds (default: 10)
    #[serde(default = "default_telemetry_interval")]
    pub interval_secs: u64,
    /// Heartbeat interval in seconds (default: 60)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// Network probing and send retry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Host used for the reachability probe (default: www.google.com)
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    /// Port used for the reachability probe (default: 80)
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    /// Polling interval while waiting for the network, in seconds (default: 5)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Per-attempt send timeout and retry delay, in seconds (default: 5)
    #[serde(default = "default_send_retry_interval")]
    pub send_retry_interval_secs: u64,
}

/// Actuator power-cycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorSection {
    /// How long the actuator stays powered off during a cycle (default: 5.0)
    #[serde(default = "default_power_off_delay")]
    pub power_off_delay_secs: f64,
}

/// Startup and shutdown policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartupSection {
    /// Bounded network checks before startup is declared failed (default: 3)
    #[serde(default = "default_max_network_checks")]
    pub max_network_checks: u32,
    /// Bounded session connect attempts at startup (default: 3)
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Grace period between clearing the running flag and disconnecting (default: 2)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_telemetry_interval() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_probe_host() -> String {
    "www.google.com".to_string()
}

fn default_probe_port() -> u16 {
    80
}

fn default_check_interval() -> u64 {
    5
}

fn default_send_retry_interval() -> u64 {
    5
}

fn default_power_off_delay() -> f64 {
    5.0
}

fn default_max_network_checks() -> u32 {
    3
}

fn default_max_connect_attempts() -> u32 {
    3
}

fn default_shutdown_grace() -> u64 {
    2
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            interval_secs: default_telemetry_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            probe_host: default_probe_host(),
            probe_port: default_probe_port(),
            check_interval_secs: default_check_interval(),
            send_retry_interval_secs: default_send_retry_interval(),
        }
    }
}

impl Default for ActuatorSection {
    fn default() -> Self {
        Self {
            power_off_delay_secs: default_power_off_delay(),
        }
    }
}

impl Default for StartupSection {
    fn default() -> Self {
        Self {
            max_network_checks: default_max_network_checks(),
            max_connect_attempts: default_max_connect_attempts(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl CloudSection {
    /// Resolve the username from its environment variable
    pub fn username(&self) -> Option<String> {
        env_var_optional(self.username_env.as_ref())
    }

    /// Resolve the password from its environment variable
    pub fn password(&self) -> Option<String> {
        env_var_optional(self.password_env.as_ref())
    }
}

fn env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AgentConfig = toml::from_str(&content)?;

        crate::protocol::validate_device_id(&config.device.id)
            .map_err(|e| ConfigError::InvalidDeviceId(e.to_string()))?;

        config.normalize();
        Ok(config)
    }

    /// Replace invalid interval values with their defaults, logging each substitution
    pub fn normalize(&mut self) {
        if self.telemetry.interval_secs == 0 {
            warn!(
                "Invalid telemetry interval 0, using default {}",
                default_telemetry_interval()
            );
            self.telemetry.interval_secs = default_telemetry_interval();
        }
        if self.telemetry.heartbeat_interval_secs == 0 {
            warn!(
                "Invalid heartbeat interval 0, using default {}",
                default_heartbeat_interval()
            );
            self.telemetry.heartbeat_interval_secs = default_heartbeat_interval();
        }
        if self.network.check_interval_secs == 0 {
            warn!(
                "Invalid network check interval 0, using default {}",
                default_check_interval()
            );
            self.network.check_interval_secs = default_check_interval();
        }
        if self.network.send_retry_interval_secs == 0 {
            warn!(
                "Invalid send retry interval 0, using default {}",
                default_send_retry_interval()
            );
            self.network.send_retry_interval_secs = default_send_retry_interval();
        }
        if self.actuator.power_off_delay_secs < 0.0 {
            warn!(
                "Invalid power off delay {}, using default {}",
                self.actuator.power_off_delay_secs,
                default_power_off_delay()
            );
            self.actuator.power_off_delay_secs = default_power_off_delay();
        }
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.heartbeat_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.network.check_interval_secs)
    }

    pub fn send_retry_interval(&self) -> Duration {
        Duration::from_secs(self.network.send_retry_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.connect_timeout_secs)
    }

    pub fn power_off_delay(&self) -> Duration {
        Duration::from_secs_f64(self.actuator.power_off_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.startup.shutdown_grace_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
name = "bench unit"

[cloud]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
