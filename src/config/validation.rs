//! Configuration validation.
//!
//! Serde handles syntax; this module checks the values make sense together.
//! Every problem is reported, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("capture.max_body_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("broadcast.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("auth.users: duplicate user {0:?}")]
    DuplicateUser(String),

    #[error("auth.users: empty user name")]
    EmptyUserName,

    #[error("rewrite rule {0:?}: path_prefix must start with '/'")]
    BadPathPrefix(String),

    #[error("rewrite rule {rule:?}: status {status} is not a valid HTTP status")]
    BadStatus { rule: String, status: u16 },

    #[error("admin.api_key must not be empty when the admin API is enabled")]
    EmptyApiKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::EmptyApiKey);
        }
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.capture.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }
    if config.broadcast.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let mut seen = HashSet::new();
    for user in &config.auth.users {
        if user.name.is_empty() {
            errors.push(ValidationError::EmptyUserName);
        } else if !seen.insert(user.name.as_str()) {
            errors.push(ValidationError::DuplicateUser(user.name.clone()));
        }
    }

    for rule in &config.rewrite.rules {
        if !rule.path_prefix.starts_with('/') {
            errors.push(ValidationError::BadPathPrefix(rule.name.clone()));
        }
        if let Some(status) = rule.status {
            if !(100..=999).contains(&status) {
                errors.push(ValidationError::BadStatus {
                    rule: rule.name.clone(),
                    status,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RewriteRule, UserConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.capture.max_body_bytes = 0;
        config.auth.users = vec![
            UserConfig { name: "a".into(), password: "x".into() },
            UserConfig { name: "a".into(), password: "y".into() },
        ];
        config.rewrite.rules.push(RewriteRule {
            name: "bad".into(),
            path_prefix: "napi".into(),
            host: None,
            upstream: None,
            replace_prefix: None,
            status: Some(42),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::ZeroBodyLimit));
        assert!(errors.contains(&ValidationError::DuplicateUser("a".into())));
    }
}
