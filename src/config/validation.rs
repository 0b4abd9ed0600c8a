//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid)
//! - Check the pool name format can tell pools apart
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - TLS material is checked later, when connectors are built

use thiserror::Error;
use crate::config::schema::DaemonConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
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

/// Validate a parsed configuration.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let broker = &config.broker;
    if broker.hosts.is_empty() {
        errors.push(ValidationError::new("broker.hosts", "at least one broker host is required"));
    }
    for (i, host) in broker.hosts.iter().enumerate() {
        if host.host.trim().is_empty() {
            errors.push(ValidationError::new(format!("broker.hosts[{}].host", i), "must not be empty"));
        }
        if host.port == 0 {
            errors.push(ValidationError::new(format!("broker.hosts[{}].port", i), "must be non-zero"));
        }
    }
    if broker.destination.trim().is_empty() {
        errors.push(ValidationError::new("broker.destination", "must not be empty"));
    }
    if broker.update_interval_secs == 0 {
        errors.push(ValidationError::new("broker.update_interval_secs", "must be greater than zero"));
    }
    if broker.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("broker.connect_timeout_secs", "must be greater than zero"));
    }
    if broker.reconnect_base_delay_ms > broker.reconnect_max_delay_ms {
        errors.push(ValidationError::new(
            "broker.reconnect_base_delay_ms",
            "must not exceed broker.reconnect_max_delay_ms",
        ));
    }

    let routing = &config.routing;
    let format = &routing.pool_name_format;
    if !format.contains("%a") || !format.contains("%n") {
        errors.push(ValidationError::new(
            "routing.pool_name_format",
            "must contain both %a and %n",
        ));
    }
    if format.contains('/') {
        errors.push(ValidationError::new("routing.pool_name_format", "must not contain '/'"));
    }
    if routing.cloud_domain.trim().is_empty() {
        errors.push(ValidationError::new("routing.cloud_domain", "must not be empty"));
    }
    if routing.gear_profiles.is_empty() {
        errors.push(ValidationError::new(
            "routing.gear_profiles",
            "must list gear sizes or contain \"all\"",
        ));
    }

    let apache = &config.apache;
    if apache.managed_subdir.is_empty() || apache.managed_subdir.contains('/') {
        errors.push(ValidationError::new(
            "apache.managed_subdir",
            "must be a single directory name",
        ));
    }
    if apache.service.trim().is_empty() {
        errors.push(ValidationError::new("apache.service", "must not be empty"));
    }
    if apache.ssl_port == 0 {
        errors.push(ValidationError::new("apache.ssl_port", "must be non-zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&DaemonConfig::default()).is_ok());
    }

    #[test]
    fn test_pool_format_needs_both_directives() {
        let mut config = DaemonConfig::default();
        config.routing.pool_name_format = "pool_%a".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "routing.pool_name_format");
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = DaemonConfig::default();
        config.broker.hosts.clear();
        config.routing.gear_profiles.clear();
        config.apache.managed_subdir = "a/b".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = DaemonConfig::default();
        config.observability.metrics_address = "not an address".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
