//! Incremental static regeneration around a renderer.
//!
//! # Responsibilities
//! - Serve fresh cached pages (`x-nextjs-cache: HIT`)
//! - Serve stale pages and enqueue their regeneration (`STALE`)
//! - Render misses, store cacheable responses with their tags (`MISS`)
//! - Let revalidation requests bypass the cache read
//!
//! # Design Decisions
//! - Only `200` responses with `s-maxage` and without `private`/`no-store`
//!   or `Set-Cookie` are stored
//! - Bodies are stored base64-encoded and decoded only on the wire
//! - A `HEAD` revalidation renders with `GET` so there is a body to store

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::key::page_key;
use crate::cache::{implicit_tag, now_millis, CacheCoordinator, CacheVariant};
use crate::dispatch::render::{RenderError, Renderer};
use crate::http::request::InternalRequest;
use crate::http::response::InternalResponse;
use crate::observability::metrics;
use crate::queue::revalidator::PRERENDER_REVALIDATE_HEADER;
use crate::routing::normalizer::is_data_request;

/// Response header reporting the cache outcome.
pub const CACHE_STATUS_HEADER: &str = "x-nextjs-cache";

/// Response header listing the tags of a rendered page, comma separated.
pub const CACHE_TAGS_HEADER: &str = "x-next-cache-tags";

/// Response headers that are never stored.
const UNSTORED_HEADERS: [&str; 5] = [
    "connection",
    "transfer-encoding",
    "date",
    "set-cookie",
    CACHE_STATUS_HEADER,
];

/// Stored form of a rendered response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPage {
    pub status: u16,
    pub headers: Vec<(String, String)>,

    /// Base64-encoded body.
    pub body: String,

    /// Seconds the page stays fresh.
    pub revalidate: u64,
}

impl CachedPage {
    pub fn from_response(response: &InternalResponse, revalidate: u64) -> Self {
        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| !UNSTORED_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            status: response.status.as_u16(),
            headers,
            body: STANDARD.encode(response.decoded_body()),
            revalidate,
        }
    }

    pub fn to_response(&self, cache_status: &'static str) -> InternalResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(cache_status));
        InternalResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(self.body.clone()),
            is_base64_encoded: true,
        }
    }

    /// Fresh while younger than `revalidate` and not forced stale.
    pub fn is_fresh(&self, last_modified: i64, now: i64) -> bool {
        last_modified >= 0 && now.saturating_sub(last_modified) < (self.revalidate as i64).saturating_mul(1000)
    }
}

/// Seconds a response may be cached, from its `Cache-Control`.
pub fn cacheable_seconds(response: &InternalResponse) -> Option<u64> {
    if response.status != StatusCode::OK || response.headers.contains_key(header::SET_COOKIE) {
        return None;
    }
    let cache_control = response.header(header::CACHE_CONTROL.as_str())?.to_ascii_lowercase();
    let mut s_maxage = None;
    for directive in cache_control.split(',').map(str::trim) {
        match directive {
            "private" | "no-store" => return None,
            d => {
                if let Some(value) = d.strip_prefix("s-maxage=") {
                    s_maxage = value.trim_matches('"').parse::<u64>().ok();
                }
            }
        }
    }
    s_maxage.filter(|secs| *secs > 0)
}

/// Tags declared by the renderer.
pub fn response_tags(response: &InternalResponse) -> Vec<String> {
    response
        .header(CACHE_TAGS_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct IsrRenderer {
    inner: Arc<dyn Renderer>,
    cache: CacheCoordinator,
    build_id: String,
    preview_mode_id: String,
}

impl IsrRenderer {
    pub fn new(
        inner: Arc<dyn Renderer>,
        cache: CacheCoordinator,
        build_id: impl Into<String>,
        preview_mode_id: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            cache,
            build_id: build_id.into(),
            preview_mode_id: preview_mode_id.into(),
        }
    }

    /// True for requests sent by the revalidation worker.
    pub fn is_revalidation(&self, req: &InternalRequest) -> bool {
        !self.preview_mode_id.is_empty()
            && req.header(PRERENDER_REVALIDATE_HEADER) == Some(self.preview_mode_id.as_str())
    }

    async fn render_and_store(&self, req: &InternalRequest, key: &str) -> Result<InternalResponse, RenderError> {
        let response = if req.method == Method::HEAD {
            let mut get = req.clone();
            get.method = Method::GET;
            self.inner.render(&get).await?
        } else {
            self.inner.render(req).await?
        };

        if let Some(revalidate) = cacheable_seconds(&response) {
            let mut tags = response_tags(&response);
            tags.push(implicit_tag(&req.raw_path));
            let page = CachedPage::from_response(&response, revalidate);
            match serde_json::to_value(&page) {
                Ok(value) => self.cache.set(key, CacheVariant::Page, value, &tags).await,
                Err(e) => tracing::warn!(key = %key, error = %e, "Could not serialize page"),
            }
        }

        let mut response = response;
        response
            .headers
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        Ok(response)
    }
}

#[async_trait]
impl Renderer for IsrRenderer {
    async fn render(&self, req: &InternalRequest) -> Result<InternalResponse, RenderError> {
        if req.method != Method::GET && req.method != Method::HEAD {
            return self.inner.render(req).await;
        }

        let key = page_key(&self.build_id, &req.raw_path, is_data_request(req));

        if self.is_revalidation(req) {
            tracing::debug!(key = %key, "Revalidation request, bypassing cache read");
            metrics::record_cache_lookup("page", "bypass");
            return self.render_and_store(req, &key).await;
        }

        if let Some(entry) = self.cache.get(&key, CacheVariant::Page).await {
            match serde_json::from_value::<CachedPage>(entry.value) {
                Ok(page) if page.is_fresh(entry.last_modified, now_millis()) => {
                    metrics::record_cache_lookup("page", "hit");
                    return Ok(page.to_response("HIT"));
                }
                Ok(page) => {
                    metrics::record_cache_lookup("page", "stale");
                    tracing::debug!(key = %key, last_modified = entry.last_modified, "Serving stale page");
                    self.cache.revalidate_stale(&key, &key, entry.last_modified).await;
                    return Ok(page.to_response("STALE"));
                }
                Err(e) => {
                    metrics::record_cache_lookup("page", "error");
                    tracing::warn!(key = %key, error = %e, "Unreadable cached page, rendering fresh");
                }
            }
        } else {
            metrics::record_cache_lookup("page", "miss");
        }

        self.render_and_store(req, &key).await
    }
}
