//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect duplicate backend entries
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Backend URLs and the algorithm name are checked again when the pool
//!   is built, since CLI overrides bypass the file

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} {value:?}: not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("algorithm must not be empty")]
    EmptyAlgorithm,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("backend {0:?} listed more than once")]
    DuplicateBackend(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.algorithm.trim().is_empty() {
        errors.push(ValidationError::EmptyAlgorithm);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if !seen.insert(backend.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.clone()));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::Zero("health_check.interval_secs"));
        }
        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::Zero("health_check.timeout_secs"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
