//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check cross-field requirements (sqs-http needs an endpoint)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{CacheBackend, GatewayConfig, QueueBackend, PLACEHOLDER_API_KEY};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
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

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("`{}` is not a socket address", value)));
    }
}

fn check_http_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme `{}`", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("`{}`: {}", value, e))),
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let routing = &config.routing;
    if routing.build_id.trim().is_empty() {
        errors.push(ValidationError::new("routing.build_id", "must not be empty"));
    } else if routing.build_id.contains('/') {
        errors.push(ValidationError::new("routing.build_id", "must not contain `/`"));
    }
    if !routing.base_path.is_empty()
        && (!routing.base_path.starts_with('/') || routing.base_path.ends_with('/'))
    {
        errors.push(ValidationError::new(
            "routing.base_path",
            "must start with `/` and not end with `/`",
        ));
    }
    if let Some(i18n) = &routing.i18n {
        if !i18n.locales.contains(&i18n.default_locale) {
            errors.push(ValidationError::new(
                "routing.i18n.default_locale",
                format!("`{}` is not one of the configured locales", i18n.default_locale),
            ));
        }
    }

    check_http_url(&mut errors, "render.upstream", &config.render.upstream);

    if config.cache.backend == CacheBackend::Filesystem
        && config.cache.directory.as_os_str().is_empty()
    {
        errors.push(ValidationError::new("cache.directory", "required by the filesystem backend"));
    }

    let queue = &config.queue;
    match queue.backend {
        QueueBackend::Memory => {
            if queue.workers == 0 {
                errors.push(ValidationError::new("queue.workers", "must be > 0"));
            }
            if queue.capacity == 0 {
                errors.push(ValidationError::new("queue.capacity", "must be > 0"));
            }
        }
        QueueBackend::SqsHttp => check_http_url(&mut errors, "queue.endpoint", &queue.endpoint),
    }

    let revalidation = &config.revalidation;
    if let Some(origin) = &revalidation.origin {
        check_http_url(&mut errors, "revalidation.origin", origin);
    }
    if revalidation.max_attempts == 0 {
        errors.push(ValidationError::new("revalidation.max_attempts", "must be > 0"));
    }
    if revalidation.base_delay_ms > revalidation.max_delay_ms {
        errors.push(ValidationError::new(
            "revalidation.base_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.request_secs", timeouts.request_secs),
        ("timeouts.upstream_secs", timeouts.upstream_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        let api_key = config.admin.api_key.trim();
        if api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        } else if api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "still the placeholder key"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
