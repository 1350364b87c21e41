//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer sizes, timeouts > 0)
//! - Check listen addresses parse and names are unique
//! - Check TLS material exists and is readable PEM
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;

use crate::config::schema::{ListenConfig, ServerConfig, TlsConfig};

/// Smallest send buffer that still fits a response header block.
pub const MIN_SEND_BUFFER_SIZE: usize = 1024;

/// Largest send buffer; bounded by the 24-bit HTTP/2 frame length.
pub const MAX_SEND_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listens.is_empty() {
        errors.push(ValidationError::new("listens", "at least one listen is required"));
    }

    let mut names = HashSet::new();
    for (i, listen) in config.listens.iter().enumerate() {
        if !names.insert(listen.name.as_str()) {
            errors.push(ValidationError::new(
                format!("listens[{}].name", i),
                format!("duplicate listen name '{}'", listen.name),
            ));
        }
        validate_listen(i, listen, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_listen(i: usize, listen: &ListenConfig, errors: &mut Vec<ValidationError>) {
    let prefix = format!("listens[{}]", i);

    if listen.addresses.is_empty() {
        errors.push(ValidationError::new(
            format!("{}.addresses", prefix),
            "at least one address is required",
        ));
    }
    for address in &listen.addresses {
        if address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                format!("{}.addresses", prefix),
                format!("invalid socket address '{}'", address),
            ));
        }
    }

    let network = &listen.network;
    if !(MIN_SEND_BUFFER_SIZE..=MAX_SEND_BUFFER_SIZE).contains(&network.send_buffer_size) {
        errors.push(ValidationError::new(
            format!("{}.network.send_buffer_size", prefix),
            format!(
                "must be between {} and {} bytes",
                MIN_SEND_BUFFER_SIZE, MAX_SEND_BUFFER_SIZE
            ),
        ));
    }
    if network.send_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.network.send_timeout_ms", prefix),
            "must be greater than 0",
        ));
    }
    if network.recv_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.network.recv_timeout_ms", prefix),
            "must be greater than 0",
        ));
    }
    if network.max_connections == 0 {
        errors.push(ValidationError::new(
            format!("{}.network.max_connections", prefix),
            "must be greater than 0",
        ));
    }
    if listen.http2.max_concurrent_streams == 0 {
        errors.push(ValidationError::new(
            format!("{}.http2.max_concurrent_streams", prefix),
            "must be greater than 0",
        ));
    }

    if let Some(tls) = &listen.tls {
        validate_tls(&prefix, tls, errors);
    }
}

fn validate_tls(prefix: &str, tls: &TlsConfig, errors: &mut Vec<ValidationError>) {
    match File::open(&tls.cert_path) {
        Ok(file) => {
            let mut reader = BufReader::new(file);
            let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
            match certs {
                Ok(certs) if !certs.is_empty() => {}
                Ok(_) => errors.push(ValidationError::new(
                    format!("{}.tls.cert_path", prefix),
                    format!("no certificates found in '{}'", tls.cert_path),
                )),
                Err(e) => errors.push(ValidationError::new(
                    format!("{}.tls.cert_path", prefix),
                    format!("unreadable PEM '{}': {}", tls.cert_path, e),
                )),
            }
        }
        Err(e) => errors.push(ValidationError::new(
            format!("{}.tls.cert_path", prefix),
            format!("cannot open '{}': {}", tls.cert_path, e),
        )),
    }

    match File::open(&tls.key_path) {
        Ok(file) => {
            let mut reader = BufReader::new(file);
            match rustls_pemfile::private_key(&mut reader) {
                Ok(Some(_)) => {}
                Ok(None) => errors.push(ValidationError::new(
                    format!("{}.tls.key_path", prefix),
                    format!("no private key found in '{}'", tls.key_path),
                )),
                Err(e) => errors.push(ValidationError::new(
                    format!("{}.tls.key_path", prefix),
                    format!("unreadable PEM '{}': {}", tls.key_path, e),
                )),
            }
        }
        Err(e) => errors.push(ValidationError::new(
            format!("{}.tls.key_path", prefix),
            format!("cannot open '{}': {}", tls.key_path, e),
        )),
    }
}
