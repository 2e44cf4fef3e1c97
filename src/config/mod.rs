//! # Configuration Management Module
//!
//! This module holds the on-disk settings for a MeshUpGrade station: which node to
//! talk to, which channels commands and alerts use, feature toggles, weather location
//! and the timing constants used by recovery and alert pacing.
//!
//! ## Configuration Structure
//!
//! - [`ConnectionConfig`] - Last known link to the node (TCP host or serial path)
//! - [`RoutingConfig`] - Command channel and alert channel indexes
//! - [`FeaturesConfig`] - Signal test replies, GPS lookup, short name sync
//! - [`WeatherConfig`] - Fallback location, units and alert polling
//! - [`TimingConfig`] - Settle, reboot, watchdog and pacing intervals
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshupgrade::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Node address: {}", config.connection.address);
//!     for warning in config.warnings() {
//!         println!("warning: {}", warning);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [connection]
//! kind = "tcp"
//! address = "192.168.1.50"
//!
//! [routing]
//! command_channel = 2
//! alert_channel = 1
//!
//! [features]
//! signal_test = true
//! sync_shortname = false
//! ```
//!
//! Every section except `[connection]` may be omitted; missing values fall back to
//! the defaults below.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::connection::{ConnectionDescriptor, ConnectionKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// "tcp" or "serial"
    pub kind: String,
    /// Host, host:port, serial device path, or "auto" for the first USB serial device.
    /// Tip: a `node-name.local` host survives DHCP changes without discovery.
    pub address: String,
    /// Meshtastic stream API port used for TCP links and discovery probes.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Write the descriptor back to the config file after every successful connect.
    #[serde(default = "default_true")]
    pub remember_last: bool,
}

fn default_tcp_port() -> u16 {
    4403
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Channel whose broadcasts are treated as commands. None means DM only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_channel: Option<u32>,
    /// Channel used for weather alert broadcasts.
    #[serde(default)]
    pub alert_channel: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            command_channel: None,
            alert_channel: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Reply to unknown commands with the received SNR/RSSI.
    #[serde(default = "default_true")]
    pub signal_test: bool,
    /// Prefer the sender's reported GPS position for weather lookups.
    #[serde(default = "default_true")]
    pub use_node_gps: bool,
    /// Rename the node to `online_short_name` on connect and `offline_short_name` on exit.
    #[serde(default)]
    pub sync_shortname: bool,
    /// After the exit rename, wait for the reboot and announce the new name.
    #[serde(default)]
    pub sync_ping: bool,
    #[serde(default = "default_online_name")]
    pub online_short_name: String,
    #[serde(default = "default_offline_name")]
    pub offline_short_name: String,
}

fn default_online_name() -> String {
    "ON".to_string()
}

fn default_offline_name() -> String {
    "OFF".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            signal_test: true,
            use_node_gps: true,
            sync_shortname: false,
            sync_ping: false,
            online_short_name: default_online_name(),
            offline_short_name: default_offline_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Enable/disable weather commands
    pub enabled: bool,
    /// Fallback location when the sender has no GPS fix
    pub latitude: f64,
    pub longitude: f64,
    /// "F" or "C"
    pub unit: String,
    /// Broadcast NWS alerts on the alert channel
    #[serde(default)]
    pub alerts_enabled: bool,
    #[serde(default = "default_alert_poll")]
    pub alert_poll_interval_secs: u64,
    #[serde(default = "default_alert_initial_delay")]
    pub alert_initial_delay_secs: u64,
    /// Request timeout in seconds
    #[serde(default = "default_weather_timeout")]
    pub timeout_seconds: u64,
}

fn default_alert_poll() -> u64 {
    600
}

fn default_alert_initial_delay() -> u64 {
    10
}

fn default_weather_timeout() -> u64 {
    10
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latitude: 40.7128,
            longitude: -74.0060,
            unit: "F".to_string(),
            alerts_enabled: false,
            alert_poll_interval_secs: default_alert_poll(),
            alert_initial_delay_secs: default_alert_initial_delay(),
            timeout_seconds: default_weather_timeout(),
        }
    }
}

impl WeatherConfig {
    pub fn is_celsius(&self) -> bool {
        self.unit.eq_ignore_ascii_case("C")
    }
}

/// Fixed waits used by recovery, discovery and broadcast pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause before issuing a rename so we don't race the link (ms)
    pub settle_ms: u64,
    /// How long the node takes to come back after a rename (s)
    pub reboot_wait_secs: u64,
    pub watchdog_interval_secs: u64,
    /// Gap between consecutive alert broadcasts (s)
    pub alert_pacing_secs: u64,
    /// Quiet window after an identity announce (s)
    pub announce_cooldown_secs: u64,
    pub probe_timeout_ms: u64,
    pub probe_concurrency: usize,
    /// Time a discovered candidate gets to report its identity (ms)
    pub discovery_settle_ms: u64,
    /// Final pause before closing after the exit announce (ms)
    pub shutdown_buffer_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            reboot_wait_secs: 40,
            watchdog_interval_secs: 30,
            alert_pacing_secs: 7,
            announce_cooldown_secs: 5,
            probe_timeout_ms: 200,
            probe_concurrency: 50,
            discovery_settle_ms: 1000,
            shutdown_buffer_ms: 2000,
            connect_timeout_secs: 10,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn reboot_wait(&self) -> Duration {
        Duration::from_secs(self.reboot_wait_secs)
    }
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
    pub fn alert_pacing(&self) -> Duration {
        Duration::from_secs(self.alert_pacing_secs)
    }
    pub fn announce_cooldown(&self) -> Duration {
        Duration::from_secs(self.announce_cooldown_secs)
    }
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
    pub fn discovery_settle(&self) -> Duration {
        Duration::from_millis(self.discovery_settle_ms)
    }
    pub fn shutdown_buffer(&self) -> Duration {
        Duration::from_millis(self.shutdown_buffer_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshupgrade.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Write this configuration to `path`, replacing any existing file
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        Config::default().save(path).await
    }

    /// Descriptor for the configured link, if the kind is recognised.
    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        let kind = match self.connection.kind.to_ascii_lowercase().as_str() {
            "tcp" => ConnectionKind::Tcp,
            "serial" => ConnectionKind::Serial,
            _ => return None,
        };
        Some(ConnectionDescriptor::new(kind, self.connection.address.clone()))
    }

    /// Record `descriptor` as the last link and persist it to `path`.
    pub async fn remember_connection(
        &mut self,
        path: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Result<()> {
        self.connection.kind = match descriptor.kind {
            ConnectionKind::Tcp => "tcp".to_string(),
            ConnectionKind::Serial => "serial".to_string(),
        };
        self.connection.address = descriptor.address.clone();
        self.save(path).await
    }

    /// Non-fatal configuration problems worth showing to the operator.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.descriptor().is_none() {
            out.push(format!(
                "Unknown connection kind '{}' (expected tcp or serial)",
                self.connection.kind
            ));
        }
        if self.routing.command_channel == Some(self.routing.alert_channel) {
            out.push("Command channel cannot be the same as the Alert channel.".to_string());
        }
        if self.weather.alerts_enabled && self.routing.alert_channel == 0 {
            out.push(
                "Broadcasting alerts on channel 0 (primary) is highly discouraged and may get the node banned from some meshes."
                    .to_string(),
            );
        }
        out
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connection: ConnectionConfig {
                kind: "tcp".to_string(),
                address: "192.168.1.50".to_string(),
                tcp_port: default_tcp_port(),
                baud_rate: default_baud_rate(),
                remember_last: true,
            },
            routing: RoutingConfig::default(),
            features: FeaturesConfig::default(),
            weather: WeatherConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
