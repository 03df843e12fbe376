//! Configuration for the bridge.
//!
//! Loaded once from a YAML file at startup and immutable afterwards:
//! console address, local bind port, the channel map, and the protocol
//! timing tunables (which carry the console's documented defaults).

use crate::channels::{ChannelMap, ChannelMapError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    pub console: ConsoleConfig,
    pub channels: Vec<ChannelEntry>,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Console network endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    /// Console IP or hostname
    pub host: String,
    /// Console OSC port
    #[serde(default = "default_console_port")]
    pub port: u16,
    /// Local UDP bind port; 0 lets the OS pick one
    #[serde(default)]
    pub local_port: u16,
}

/// One display-name to console-channel mapping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelEntry {
    pub name: String,
    pub channel: u16,
}

/// Protocol timing tunables, all in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// How long to wait for one handshake reply
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Handshake attempts before initial connection gives up
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    /// Delay between handshake / reconnection attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// `/xremote` keepalive period; the console stops pushing updates
    /// if it goes quiet for ~10s
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// `/meters` poll period
    #[serde(default = "default_meter_poll_interval_ms")]
    pub meter_poll_interval_ms: u64,
    /// How long a get-value request waits for its reply
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Update interval requested in the fader subscription
    #[serde(default = "default_subscription_interval_ms")]
    pub subscription_interval_ms: u64,
}

impl BridgeConfig {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: BridgeConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Build the immutable channel map, validating uniqueness.
    pub fn channel_map(&self) -> Result<ChannelMap, ChannelMapError> {
        ChannelMap::new(
            self.channels
                .iter()
                .map(|e| (e.name.clone(), e.channel))
                .collect(),
        )
    }
}

impl TimingConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn meter_poll_interval(&self) -> Duration {
        Duration::from_millis(self.meter_poll_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            handshake_attempts: default_handshake_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            meter_poll_interval_ms: default_meter_poll_interval_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            subscription_interval_ms: default_subscription_interval_ms(),
        }
    }
}

// Default value functions
fn default_console_port() -> u16 { 10023 }
fn default_handshake_timeout_ms() -> u64 { 10_000 }
fn default_handshake_attempts() -> u32 { 5 }
fn default_retry_delay_ms() -> u64 { 1_000 }
fn default_keepalive_interval_ms() -> u64 { 9_000 }
fn default_meter_poll_interval_ms() -> u64 { 50 }
fn default_reply_timeout_ms() -> u64 { 10_000 }
fn default_subscription_interval_ms() -> u64 { 50 }

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
console:
  host: 192.168.217.20
channels:
  - { name: "Headset 1", channel: 1 }
  - { name: "Hand 1", channel: 3 }
"#;

    #[test]
    fn test_defaults_fill_in() {
        let config: BridgeConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.console.port, 10023);
        assert_eq!(config.console.local_port, 0);
        assert_eq!(config.timing.handshake_attempts, 5);
        assert_eq!(config.timing.keepalive_interval_ms, 9_000);
        assert_eq!(config.timing.meter_poll_interval_ms, 50);
    }

    #[test]
    fn test_channel_map_builds_from_entries() {
        let config: BridgeConfig = serde_yaml::from_str(MINIMAL).unwrap();
        let map = config.channel_map().unwrap();
        assert_eq!(
            map.fader_address("Hand 1").as_deref(),
            Some("/ch/03/mix/fader")
        );
    }

    #[test]
    fn test_duplicate_channel_numbers_are_rejected() {
        let yaml = r#"
console: { host: 10.0.0.1 }
channels:
  - { name: A, channel: 2 }
  - { name: B, channel: 2 }
"#;
        let config: BridgeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.channel_map().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = BridgeConfig::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.console.host, "192.168.217.20");
        assert_eq!(config.channels.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_file_has_context() {
        let err = BridgeConfig::load("/does/not/exist.yaml")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
