//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Parse backend addresses into base URLs
//! - Validate value ranges (attempts >= 1, intervals > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::BalancerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one backend is required")]
    NoBackends,

    #[error("invalid backend address '{address}': {reason}")]
    InvalidBackend { address: String, reason: String },

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),

    #[error("dispatch.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("health_check.interval_ms must be greater than 0")]
    ZeroInterval,

    #[error("health_check.timeout_ms must be greater than 0")]
    ZeroProbeTimeout,
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for address in config.backends.iter() {
        if let Err(e) = parse_backend_address(address) {
            errors.push(e);
        }
    }

    if config.dispatch.max_attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }
    if config.health_check.interval_ms == 0 {
        errors.push(ValidationError::ZeroInterval);
    }
    if config.health_check.timeout_ms == 0 {
        errors.push(ValidationError::ZeroProbeTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a configured backend address into its base URL.
///
/// A bare `host:port` is treated as `http://host:port`.
pub fn parse_backend_address(raw: &str) -> Result<Url, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidBackend {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty address"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid("only http backends are supported"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed"));
    }

    Ok(url)
}
