//! Server configuration.
//!
//! Loaded from a camelCase JSON file. Every field has a default, so an empty
//! object (or no file at all) gives a working server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the uanode server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Server name sent in the Hello message.
    pub name: String,
    pub product_name: String,
    pub build_number: String,
    pub build_date: String,
    /// Address to bind to.
    pub host: IpAddr,
    /// WebSocket port. `0` picks an ephemeral port.
    pub port: u16,
    /// Optional port for the read-only HTTP API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    pub min_sampling_interval_ms: u64,
    /// Interval used when a subscription does not request one.
    pub default_sampling_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub notification_queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_epsilon: Option<f64>,
    pub security: SecurityConfig,
    pub demo: DemoConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "uanode-server".to_string(),
            product_name: "Sample uanode Server".to_string(),
            build_number: "7658".to_string(),
            build_date: "2020-07-14".to_string(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 26543,
            http_port: None,
            min_sampling_interval_ms: 100,
            default_sampling_interval_ms: 1000,
            shutdown_timeout_ms: 5000,
            notification_queue_capacity: 1024,
            change_epsilon: None,
            security: SecurityConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_port.map(|port| SocketAddr::new(self.host, port))
    }

    pub fn min_sampling_interval(&self) -> Duration {
        Duration::from_millis(self.min_sampling_interval_ms)
    }

    pub fn default_sampling_interval(&self) -> Duration {
        Duration::from_millis(self.default_sampling_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Security policies and modes offered on the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub policies: Vec<String>,
    pub modes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            policies: vec!["Basic256Sha256".to_string()],
            modes: vec!["SignAndEncrypt".to_string()],
            certificate_file: None,
            private_key_file: None,
        }
    }
}

/// Timer settings of the sample address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemoConfig {
    pub toggle_interval_ms: u64,
    pub sine_phase_interval_ms: u64,
    pub sine_phase_step: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            toggle_interval_ms: 1000,
            sine_phase_interval_ms: 500,
            sine_phase_step: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 26543);
        assert_eq!(config.min_sampling_interval(), Duration::from_millis(100));
        assert_eq!(config.security.policies, vec!["Basic256Sha256"]);
        assert_eq!(config.demo.sine_phase_step, 0.1);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "port": 4840,
            "host": "127.0.0.1",
            "changeEpsilon": 0.5,
            "security": { "modes": ["None", "Sign"] },
            "demo": { "toggleIntervalMs": 250 }
        }"#;
        let config = ServerConfig::from_json_str(json).unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:4840".parse().unwrap());
        assert_eq!(config.change_epsilon, Some(0.5));
        assert_eq!(config.security.modes, vec!["None", "Sign"]);
        assert_eq!(config.security.policies, vec!["Basic256Sha256"]);
        assert_eq!(config.demo.toggle_interval_ms, 250);
        assert_eq!(config.demo.sine_phase_interval_ms, 500);
        assert_eq!(config.http_addr(), None);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"port": "high"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_json_file("/nonexistent/uanode.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/uanode.json"));
    }
}
