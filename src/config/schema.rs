//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section has defaults, so an empty file is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::http::MessageLimits;
use crate::tls::TlsRole;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NioConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Optional TLS overlay for accepted connections.
    pub tls: Option<TlsConfig>,

    /// Buffer sizes and message head limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Seconds a connection may sit without I/O before it is closed.
    pub idle_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            idle_timeout_secs: 60,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// Handshake role taken on accepted sessions.
    #[serde(default = "default_tls_role")]
    pub role: TlsRole,
}

fn default_tls_role() -> TlsRole {
    TlsRole::Server
}

/// Buffer sizes and head parsing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes read from the socket per attempt.
    pub socket_buffer_size: usize,

    /// Outbound bytes buffered before body production pauses.
    pub output_buffer_size: usize,

    /// Maximum header fields per request.
    pub max_header_count: usize,

    /// Maximum length of a request line or header line.
    pub max_line_length: usize,
}

impl LimitsConfig {
    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_header_count: self.max_header_count,
            max_line_length: self.max_line_length,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = MessageLimits::default();
        Self {
            socket_buffer_size: 8192,
            output_buffer_size: 16384,
            max_header_count: limits.max_header_count,
            max_line_length: limits.max_line_length,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
