//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker process/thread settings.
    pub runtime: RuntimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Listening endpoints. Each listen may bind several addresses.
    pub listens: Vec<ListenConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            observability: ObservabilityConfig::default(),
            listens: vec![ListenConfig::default()],
        }
    }
}

/// Worker runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads. 0 = one per available CPU.
    pub workers: usize,
}

impl RuntimeConfig {
    /// Resolve the effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// One listen block: a set of addresses sharing TLS and network settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Listen identifier for logging.
    pub name: String,

    /// Bind addresses (e.g., "0.0.0.0:8080").
    pub addresses: Vec<String>,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Socket buffering and timeouts.
    pub network: NetworkConfig,

    /// HTTP/2 session settings.
    pub http2: Http2Config,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            addresses: vec!["0.0.0.0:8080".to_string()],
            tls: None,
            network: NetworkConfig::default(),
            http2: Http2Config::default(),
        }
    }
}

/// TLS configuration for a listen.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Per-connection network settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Send buffer size in bytes. HTTP/2 adds one frame header of slack.
    pub send_buffer_size: usize,

    /// A write stalled longer than this closes the connection.
    pub send_timeout_ms: u64,

    /// Idle time without inbound bytes before the recv timer fires.
    pub recv_timeout_ms: u64,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,
}

impl NetworkConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: 16 * 1024,
            send_timeout_ms: 10_000,
            recv_timeout_ms: 60_000,
            max_connections: 10_000,
        }
    }
}

/// HTTP/2 session settings handed to the framing library.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http2Config {
    /// SETTINGS_MAX_CONCURRENT_STREAMS advertised to peers.
    pub max_concurrent_streams: u32,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Colorize log output.
    pub ansi: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [[listens]]
            name = "web"
            addresses = ["127.0.0.1:9000"]

            [listens.network]
            send_buffer_size = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.listens.len(), 1);
        let listen = &config.listens[0];
        assert_eq!(listen.name, "web");
        assert_eq!(listen.network.send_buffer_size, 4096);
        assert_eq!(listen.network.send_timeout_ms, 10_000);
        assert_eq!(listen.http2.max_concurrent_streams, 100);
        assert!(listen.tls.is_none());
    }

    #[test]
    fn explicit_worker_count_wins() {
        let runtime = RuntimeConfig { workers: 3 };
        assert_eq!(runtime.worker_count(), 3);
        assert!(RuntimeConfig::default().worker_count() >= 1);
    }
}
