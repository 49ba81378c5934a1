//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the routing context from config and manifests
//! - Pick the cache, tag cache and queue backends by name
//! - Start the revalidation worker
//! - Assemble the dispatcher the HTTP server runs on
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners are bound by the caller, after this returns

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cache::{
    CacheCoordinator, CacheError, FileIncrementalCache, IncrementalCache, MemoryIncrementalCache,
    MemoryTagCache, TagCache,
};
use crate::config::schema::{CacheBackend, QueueBackend, TagCacheBackend};
use crate::config::{load_routing_context, ConfigError, GatewayConfig};
use crate::dispatch::{Dispatcher, ExternalProxy, IsrRenderer, RenderError, Renderer, UpstreamRenderer};
use crate::lifecycle::Shutdown;
use crate::queue::{HttpRevalidator, MemoryQueue, QueueError, RevalidationQueue, SqsHttpQueue};
use crate::resilience::RetryPolicy;
use crate::routing::RoutingContext;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("renderer setup failed: {0}")]
    Render(#[from] RenderError),
}

/// Everything a running gateway shares between its listeners.
#[derive(Debug, Clone)]
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub routing: Arc<RoutingContext>,
    pub cache: CacheCoordinator,
    pub dispatcher: Dispatcher,

    /// Shared secret of revalidation requests.
    pub preview_mode_id: Arc<str>,
    pub started_at: Instant,
}

/// Host revalidations target when no request supplied one.
/// Unspecified bind addresses map to loopback.
pub fn default_host(bind_address: &str) -> String {
    match bind_address.parse::<SocketAddr>() {
        Ok(addr) if addr.ip().is_unspecified() => {
            let loopback: SocketAddr = if addr.is_ipv4() {
                ([127, 0, 0, 1], addr.port()).into()
            } else {
                (std::net::Ipv6Addr::LOCALHOST, addr.port()).into()
            };
            loopback.to_string()
        }
        _ => bind_address.to_string(),
    }
}

/// Base URL revalidation requests go to: the configured origin, else this
/// gateway's own plain-HTTP listener.
pub fn revalidation_origin(config: &GatewayConfig) -> String {
    match &config.revalidation.origin {
        Some(origin) => origin.clone(),
        None => format!("http://{}", default_host(&config.listener.bind_address)),
    }
}

/// The manifest's preview id, or a random one when it has none.
fn resolve_preview_mode_id(routing: &RoutingContext) -> String {
    match routing.preview_mode_id() {
        "" => {
            tracing::info!("No preview id in the prerender manifest, generated one");
            uuid::Uuid::new_v4().simple().to_string()
        }
        id => id.to_string(),
    }
}

/// Build the gateway. The queue worker subscribes to `shutdown`.
pub async fn build_gateway(config: GatewayConfig, shutdown: &Shutdown) -> Result<Gateway, StartupError> {
    let routing = Arc::new(load_routing_context(&config)?);
    let build_id = routing.build_id.clone();
    let preview_mode_id = resolve_preview_mode_id(&routing);
    let timeouts = &config.timeouts;
    let upstream_timeout = Duration::from_secs(timeouts.upstream_secs);

    let incremental: Arc<dyn IncrementalCache> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryIncrementalCache::new(build_id.clone())),
        CacheBackend::Filesystem => {
            tokio::fs::create_dir_all(&config.cache.directory)
                .await
                .map_err(CacheError::Io)?;
            Arc::new(FileIncrementalCache::new(config.cache.directory.clone(), build_id.clone()))
        }
    };

    let tags: Arc<dyn TagCache> = match (&config.tag_cache.backend, &config.tag_cache.seed_file) {
        (TagCacheBackend::Memory, Some(path)) => Arc::new(MemoryTagCache::seeded_from_file(path).await?),
        (TagCacheBackend::Memory, None) => Arc::new(MemoryTagCache::new()),
    };

    let policy = RetryPolicy::from(&config.revalidation);
    let queue: Arc<dyn RevalidationQueue> = match config.queue.backend {
        QueueBackend::Memory => {
            let origin = revalidation_origin(&config);
            tracing::debug!(origin = %origin, "Revalidation origin");
            let revalidator = HttpRevalidator::new(&origin, preview_mode_id.clone(), upstream_timeout)?;
            Arc::new(MemoryQueue::start(
                &config.queue,
                policy,
                Arc::new(revalidator),
                shutdown.subscribe(),
            ))
        }
        QueueBackend::SqsHttp => Arc::new(SqsHttpQueue::new(
            &config.queue,
            policy,
            Duration::from_secs(timeouts.request_secs),
        )?),
    };

    let cache = CacheCoordinator::new(incremental, tags, queue, default_host(&config.listener.bind_address));

    let upstream = UpstreamRenderer::new(
        &config.render.upstream,
        Duration::from_secs(timeouts.connect_secs),
        upstream_timeout,
    )?;
    let renderer: Arc<dyn Renderer> = if config.render.isr_enabled {
        Arc::new(IsrRenderer::new(
            Arc::new(upstream),
            cache.clone(),
            build_id.clone(),
            preview_mode_id.clone(),
        ))
    } else {
        Arc::new(upstream)
    };

    let dispatcher = Dispatcher::new(Arc::clone(&routing), renderer, ExternalProxy::new(upstream_timeout)?);

    tracing::info!(
        build_id = %build_id,
        cache = cache.incremental().name(),
        tag_cache = cache.tags().name(),
        queue = cache.queue().name(),
        upstream = %config.render.upstream,
        isr = config.render.isr_enabled,
        "Gateway initialized"
    );

    Ok(Gateway {
        config: Arc::new(config),
        routing,
        cache,
        dispatcher,
        preview_mode_id: Arc::from(preview_mode_id),
        started_at: Instant::now(),
    })
}
