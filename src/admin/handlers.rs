use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::cache::{implicit_tag, CacheEntry, CacheError, CacheVariant};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("no cache entry for {0}")]
    NotFound(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub build_id: String,
    pub uptime_secs: u64,
    pub cache: String,
    pub tag_cache: String,
    pub queue: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevalidationSummary {
    pub tag: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct PutCacheEntry {
    pub value: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let cache = &state.cache;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        build_id: state.build_id.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        cache: cache.incremental().name().to_string(),
        tag_cache: cache.tags().name().to_string(),
        queue: cache.queue().name().to_string(),
    })
}

pub async fn revalidate_tag(
    State(state): State<AdminState>,
    Path(tag): Path<String>,
) -> Json<RevalidationSummary> {
    let paths = state.cache.revalidate_tag(&tag).await;
    tracing::info!(tag = %tag, paths = paths.len(), "Admin tag revalidation");
    Json(RevalidationSummary { tag, paths })
}

pub async fn revalidate_path(
    State(state): State<AdminState>,
    Query(query): Query<PathQuery>,
) -> Json<RevalidationSummary> {
    let paths = state.cache.revalidate_path(&query.path).await;
    tracing::info!(path = %query.path, paths = paths.len(), "Admin path revalidation");
    Json(RevalidationSummary {
        tag: implicit_tag(&query.path),
        paths,
    })
}

pub async fn get_tags(
    State(state): State<AdminState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<String>>, AdminError> {
    Ok(Json(state.cache.tags().get_by_path(&query.path).await?))
}

pub async fn get_tag_paths(
    State(state): State<AdminState>,
    Path(tag): Path<String>,
) -> Result<Json<Vec<String>>, AdminError> {
    Ok(Json(state.cache.tags().get_by_tag(&tag).await?))
}

/// Entry with the tag watermark applied; `lastModified` is `-1` when stale.
pub async fn get_cache_entry(
    State(state): State<AdminState>,
    Path(variant): Path<CacheVariant>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<CacheEntry>, AdminError> {
    state
        .cache
        .get(&query.key, variant)
        .await
        .map(Json)
        .ok_or(AdminError::NotFound(query.key))
}

pub async fn put_cache_entry(
    State(state): State<AdminState>,
    Path(variant): Path<CacheVariant>,
    Query(query): Query<KeyQuery>,
    Json(body): Json<PutCacheEntry>,
) -> StatusCode {
    state.cache.set(&query.key, variant, body.value, &body.tags).await;
    StatusCode::NO_CONTENT
}

pub async fn delete_cache_entry(
    State(state): State<AdminState>,
    Path(_variant): Path<CacheVariant>,
    Query(query): Query<KeyQuery>,
) -> StatusCode {
    state.cache.delete(&query.key).await;
    StatusCode::NO_CONTENT
}
