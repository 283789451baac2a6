//! Configuration file support
//!
//! Loads configuration from ~/.config/quicbench/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::net::AddressFamily;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientDefaults,
}

/// Default settings for client mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientDefaults {
    /// Default server hostname or IP
    pub host: Option<String>,

    /// Default UDP port
    pub port: Option<u16>,

    /// Streams per phase
    pub streams: Option<usize>,

    /// Payload bytes per upload stream (e.g., "256K", "1M" or a plain number)
    pub data_size: Option<String>,

    /// Expect server-initiated unidirectional streams first
    pub uni: Option<bool>,

    /// Per-read timeout during the download phase, in seconds
    pub read_timeout_secs: Option<u64>,

    /// QUIC connection idle timeout, in seconds
    pub idle_timeout_secs: Option<u64>,

    /// Abort a download stream after this many consecutive read timeouts
    pub max_read_timeouts: Option<u32>,

    /// Address family preference (ipv4, ipv6, dual)
    pub address_family: Option<AddressFamily>,

    /// Default to JSON output
    pub json_output: Option<bool>,

    /// Log file path (e.g., "~/.config/quicbench/quicbench.log")
    pub log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from the default path.
    /// Returns default config if file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quicbench")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.client.streams.is_none());
        assert!(config.client.host.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[client]
host = "bench.example.net"
port = 4448
streams = 64
data_size = "1M"
uni = true
read_timeout_secs = 10
max_read_timeouts = 5
address_family = "ipv6"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.client.host.as_deref(), Some("bench.example.net"));
        assert_eq!(config.client.port, Some(4448));
        assert_eq!(config.client.streams, Some(64));
        assert_eq!(config.client.data_size.as_deref(), Some("1M"));
        assert_eq!(config.client.uni, Some(true));
        assert_eq!(config.client.read_timeout_secs, Some(10));
        assert_eq!(config.client.max_read_timeouts, Some(5));
        assert_eq!(config.client.address_family, Some(AddressFamily::V6Only));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.client.port.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nstreams = 12\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.client.streams, Some(12));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nstreams = \"many\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
