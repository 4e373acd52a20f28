//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, addresses parse)
//! - Check that referenced TLS files exist
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NioConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::NioConfig;
use crate::tls::TlsRole;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every section and collect all failures.
pub fn validate_config(config: &NioConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.idle_timeout_secs", "must be greater than 0"));
    }

    if let Some(tls) = &config.tls {
        if tls.role == TlsRole::Server {
            if !tls.cert_path.exists() {
                errors.push(ValidationError::new(
                    "tls.cert_path",
                    format!("{} does not exist", tls.cert_path.display()),
                ));
            }
            if !tls.key_path.exists() {
                errors.push(ValidationError::new(
                    "tls.key_path",
                    format!("{} does not exist", tls.key_path.display()),
                ));
            }
        }
    }

    let limits = &config.limits;
    if limits.socket_buffer_size == 0 {
        errors.push(ValidationError::new("limits.socket_buffer_size", "must be greater than 0"));
    }
    if limits.output_buffer_size < 64 {
        errors.push(ValidationError::new("limits.output_buffer_size", "must be at least 64"));
    }
    if limits.max_header_count == 0 {
        errors.push(ValidationError::new("limits.max_header_count", "must be greater than 0"));
    }
    if limits.max_line_length < 16 {
        errors.push(ValidationError::new("limits.max_line_length", "must be at least 16"));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
