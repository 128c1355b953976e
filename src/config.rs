//! Runtime configuration for the chat binary

use crate::connection::ConnectionConfig;
use crate::transport::RfcommConfig;
use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;

/// Transport the chat binary runs over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    Rfcomm,
    /// Use TCP simulation (for development)
    #[default]
    TcpSimulation,
}

impl std::str::FromStr for TransportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfcomm" | "bluetooth" | "bt" => Ok(TransportMode::Rfcomm),
            "tcp" | "sim" | "simulation" => Ok(TransportMode::TcpSimulation),
            other => bail!("unknown transport mode {:?}", other),
        }
    }
}

/// Chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Name shown in logs for this device
    pub device_name: String,
    /// Transport mode
    pub mode: TransportMode,
    /// RFCOMM settings (when mode is Rfcomm)
    pub rfcomm: RfcommConfig,
    /// TCP listen address (when mode is TcpSimulation)
    pub tcp_listen: String,
    /// Dialable TCP peers (when mode is TcpSimulation)
    pub known_peers: Vec<String>,
    /// Directory the per-peer history files live in
    pub history_dir: PathBuf,
    /// Connection manager settings
    pub connection: ConnectionConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            device_name: "btchat".into(),
            mode: TransportMode::TcpSimulation,
            rfcomm: RfcommConfig::default(),
            tcp_listen: "127.0.0.1:9000".into(),
            known_peers: Vec::new(),
            history_dir: PathBuf::from("history"),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Create config from `BTCHAT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from defaults overridden by `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = lookup("BTCHAT_NAME") {
            config.device_name = val;
        }

        if let Some(val) = lookup("BTCHAT_MODE") {
            config.mode = val.parse().context("BTCHAT_MODE")?;
        }

        if let Some(val) = lookup("BTCHAT_CHANNEL") {
            let channel: u8 = val
                .trim()
                .parse()
                .with_context(|| format!("BTCHAT_CHANNEL: invalid channel {:?}", val))?;
            // RFCOMM channels are 1..=30
            if !(1..=30).contains(&channel) {
                return Err(anyhow!("BTCHAT_CHANNEL: channel {} out of range", channel));
            }
            config.rfcomm.channel = channel;
        }

        if let Some(val) = lookup("BTCHAT_LISTEN") {
            config.tcp_listen = val.trim().to_string();
        }

        if let Some(val) = lookup("BTCHAT_PEERS") {
            config.known_peers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(val) = lookup("BTCHAT_HISTORY_DIR") {
            config.history_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("BTCHAT_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = val
                .trim()
                .parse()
                .with_context(|| format!("BTCHAT_CONNECT_TIMEOUT_SECS: invalid value {:?}", val))?;
            config.connection.connect_timeout = std::time::Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ChatConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.mode, TransportMode::TcpSimulation);
        assert_eq!(config.tcp_listen, "127.0.0.1:9000");
        assert_eq!(config.rfcomm.channel, 1);
        assert!(config.known_peers.is_empty());
        assert_eq!(config.connection.read_buffer_size, 256);
    }

    #[test]
    fn test_overrides() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("BTCHAT_MODE", "RFCOMM"),
            ("BTCHAT_NAME", "pixel"),
            ("BTCHAT_CHANNEL", "3"),
            ("BTCHAT_PEERS", "127.0.0.1:9001, ,127.0.0.1:9002"),
            ("BTCHAT_HISTORY_DIR", "/tmp/chat"),
            ("BTCHAT_CONNECT_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.mode, TransportMode::Rfcomm);
        assert_eq!(config.device_name, "pixel");
        assert_eq!(config.rfcomm.channel, 3);
        assert_eq!(config.known_peers, vec!["127.0.0.1:9001", "127.0.0.1:9002"]);
        assert_eq!(config.history_dir, PathBuf::from("/tmp/chat"));
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(ChatConfig::from_lookup(lookup_from(&[("BTCHAT_MODE", "carrier-pigeon")])).is_err());
        assert!(ChatConfig::from_lookup(lookup_from(&[("BTCHAT_CHANNEL", "abc")])).is_err());
        assert!(ChatConfig::from_lookup(lookup_from(&[("BTCHAT_CHANNEL", "31")])).is_err());
        assert!(
            ChatConfig::from_lookup(lookup_from(&[("BTCHAT_CONNECT_TIMEOUT_SECS", "-1")])).is_err()
        );
    }
}
