//! Admin API, served on its own listener behind a bearer token.
//!
//! # Responsibilities
//! - Report gateway status
//! - Revalidate by tag or by path
//! - Inspect the tag index
//! - Read and write incremental cache entries for out-of-process renderers

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::cache::CacheCoordinator;
use crate::lifecycle::Gateway;

#[derive(Debug, Clone)]
pub struct AdminState {
    pub cache: CacheCoordinator,
    pub api_key: Arc<str>,
    pub build_id: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(gateway: &Gateway) -> Self {
        Self {
            cache: gateway.cache.clone(),
            api_key: Arc::from(gateway.config.admin.api_key.as_str()),
            build_id: Arc::from(gateway.routing.build_id.as_str()),
            started_at: gateway.started_at,
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/revalidate/tag/{tag}", post(revalidate_tag))
        .route("/admin/revalidate/path", post(revalidate_path))
        .route("/admin/tags", get(get_tags))
        .route("/admin/tags/{tag}/paths", get(get_tag_paths))
        .route(
            "/admin/cache/{variant}",
            get(get_cache_entry).put(put_cache_entry).delete(delete_cache_entry),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
