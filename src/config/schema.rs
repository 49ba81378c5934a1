//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the ISR gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Build identity, manifests and routing policy.
    pub routing: RoutingConfig,

    /// Render capability (upstream server).
    pub render: RenderConfig,

    /// Incremental cache backend.
    pub cache: CacheConfig,

    /// Tag cache backend.
    pub tag_cache: TagCacheConfig,

    /// Revalidation queue transport.
    pub queue: QueueConfig,

    /// Revalidation worker behaviour.
    pub revalidation: RevalidationConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,

    /// Maximum buffered request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Locale settings used by the `fallback: false` check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct I18nConfig {
    pub locales: Vec<String>,
    pub default_locale: String,
}

/// Build identity, manifest locations and routing policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Build id, used for data routes and cache namespacing.
    pub build_id: String,

    /// JSON file with `{headers, rewrites, redirects}`.
    pub routes_manifest: Option<PathBuf>,

    /// JSON file with `{dynamicRoutes, routes, preview}`.
    pub prerender_manifest: Option<PathBuf>,

    /// Canonical paths end with `/`.
    pub trailing_slash: bool,

    /// Disable trailing-slash redirects entirely.
    pub skip_trailing_slash_redirect: bool,

    /// Mount prefix of the application, e.g. "/docs". Empty for root.
    pub base_path: String,

    pub i18n: Option<I18nConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            build_id: "development".to_string(),
            routes_manifest: None,
            prerender_manifest: None,
            trailing_slash: false,
            skip_trailing_slash_redirect: false,
            base_path: String::new(),
            i18n: None,
        }
    }
}

/// Render capability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the rendering server (e.g., "http://127.0.0.1:3000").
    pub upstream: String,

    /// Wrap rendering with the incremental cache.
    pub isr_enabled: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            upstream: "http://127.0.0.1:3000".to_string(),
            isr_enabled: true,
        }
    }
}

/// Incremental cache backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackend {
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Root directory of the filesystem backend.
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            directory: PathBuf::from(".isr-cache"),
        }
    }
}

/// Tag cache backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagCacheBackend {
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TagCacheConfig {
    pub backend: TagCacheBackend,

    /// JSON file of `{tag, path, revalidatedAt}` records loaded at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for TagCacheConfig {
    fn default() -> Self {
        Self {
            backend: TagCacheBackend::Memory,
            seed_file: None,
        }
    }
}

/// Revalidation queue transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueBackend {
    Memory,
    SqsHttp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    /// Messages with a dedupe key seen within this window are dropped.
    pub dedupe_window_secs: u64,

    /// Worker tasks of the in-process transport.
    pub workers: usize,

    /// Bounded channel capacity of the in-process transport.
    pub capacity: usize,

    /// SQS-compatible endpoint of the `sqs-http` transport.
    pub endpoint: String,

    /// Queue URL passed in `SendMessage`.
    pub queue_url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            dedupe_window_secs: 30,
            workers: 4,
            capacity: 1024,
            endpoint: String::new(),
            queue_url: String::new(),
        }
    }
}

/// Revalidation worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RevalidationConfig {
    /// Base URL revalidation requests go to. Defaults to the gateway's own
    /// listener over plain HTTP.
    pub origin: Option<String>,

    /// Maximum attempts per message.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            origin: None,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Timeout of a single upstream render or proxy call in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            upstream_secs: 25,
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

/// Default admin key. Never accepted for a running admin API.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Rejected by validation while the admin API is enabled.
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [routing]
            build_id = "abc123"
            "#,
        )
        .unwrap();
        assert_eq!(config.routing.build_id, "abc123");
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.queue.dedupe_window_secs, 30);
        assert!(config.render.isr_enabled);
    }

    #[test]
    fn test_backend_names() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [cache]
            backend = "filesystem"
            directory = "/var/cache/isr"

            [queue]
            backend = "sqs-http"
            endpoint = "http://localhost:4566"

            [routing.i18n]
            locales = ["en", "fr"]
            default_locale = "en"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Filesystem);
        assert_eq!(config.queue.backend, QueueBackend::SqsHttp);
        assert_eq!(config.routing.i18n.unwrap().default_locale, "en");
    }
}
