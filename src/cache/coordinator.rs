//! Best-effort cache policy over the incremental cache, tag cache and queue.
//!
//! # Responsibilities
//! - Read entries and apply tag watermarks (forced stale = `last_modified -1`)
//! - Store entries together with their tags
//! - Revalidate by tag or by path: bump watermarks, then enqueue re-renders
//!
//! # Design Decisions
//! - Every backend error is logged here and degraded (miss, skipped write)
//! - Tag watermarks are written before the entry, so an entry is never older
//!   than the watermark its own write produced
//! - Revalidations always target the gateway's own host, never one taken
//!   from a client request

use std::sync::Arc;

use crate::cache::incremental::IncrementalCache;
use crate::cache::tag::{implicit_tag, TagCache, TagRecord};
use crate::cache::{now_millis, CacheEntry, CacheError, CacheVariant};
use crate::queue::{enqueue, QueueMessage, RevalidationQueue, RevalidationTarget};

#[derive(Debug, Clone)]
pub struct CacheCoordinator {
    incremental: Arc<dyn IncrementalCache>,
    tags: Arc<dyn TagCache>,
    queue: Arc<dyn RevalidationQueue>,
    default_host: String,
}

impl CacheCoordinator {
    /// `default_host` is the host every revalidation message targets.
    pub fn new(
        incremental: Arc<dyn IncrementalCache>,
        tags: Arc<dyn TagCache>,
        queue: Arc<dyn RevalidationQueue>,
        default_host: impl Into<String>,
    ) -> Self {
        Self {
            incremental,
            tags,
            queue,
            default_host: default_host.into(),
        }
    }

    pub fn incremental(&self) -> &Arc<dyn IncrementalCache> {
        &self.incremental
    }

    pub fn tags(&self) -> &Arc<dyn TagCache> {
        &self.tags
    }

    pub fn queue(&self) -> &Arc<dyn RevalidationQueue> {
        &self.queue
    }

    /// Read `key`, with `last_modified` replaced by the tag cache's verdict.
    /// Misses and backend errors both return `None`.
    pub async fn get(&self, key: &str, variant: CacheVariant) -> Option<CacheEntry> {
        let mut entry = match self.incremental.get(key, variant).await {
            Ok(entry) => entry,
            Err(CacheError::NotFound(_)) => {
                tracing::debug!(key = %key, variant = %variant, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, variant = %variant, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match self.tags.get_last_modified(key, Some(entry.last_modified)).await {
            Ok(last_modified) => entry.last_modified = last_modified,
            Err(e) => tracing::warn!(key = %key, error = %e, "Tag cache read failed"),
        }
        Some(entry)
    }

    /// Store `value` under `key` and associate it with `tags`.
    pub async fn set(&self, key: &str, variant: CacheVariant, value: serde_json::Value, tags: &[String]) {
        if !tags.is_empty() {
            let written_at = now_millis();
            let records = tags
                .iter()
                .map(|tag| TagRecord::new(key, tag.as_str()).at(written_at))
                .collect();
            if let Err(e) = self.tags.write_tags(records).await {
                tracing::warn!(key = %key, error = %e, "Tag write failed");
            }
        }

        if let Err(e) = self.incremental.set(key, variant, value).await {
            tracing::warn!(key = %key, variant = %variant, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.incremental.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Cache delete failed");
        }
    }

    /// Enqueue a background re-render of a stale entry.
    ///
    /// Entries forced stale by a tag are keyed by the watermark, so each
    /// invalidation gets its own re-render.
    pub async fn revalidate_stale(&self, url: &str, key: &str, last_modified: i64) {
        let generation = if last_modified < 0 {
            match self.tags.get_watermark(key).await {
                Ok(Some(watermark)) => watermark,
                Ok(None) => last_modified,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Watermark lookup failed");
                    last_modified
                }
            }
        } else {
            last_modified
        };
        enqueue(
            &self.queue,
            QueueMessage::for_stale_entry(&self.default_host, url, key, generation),
        );
    }

    /// Mark every path carrying `tag` stale and enqueue their re-render.
    /// Returns the affected paths.
    pub async fn revalidate_tag(&self, tag: &str) -> Vec<String> {
        let paths = match self.tags.get_by_tag(tag).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(tag = %tag, error = %e, "Tag lookup failed");
                return Vec::new();
            }
        };
        if paths.is_empty() {
            tracing::debug!(tag = %tag, "No paths carry tag");
            return paths;
        }

        let revalidated_at = now_millis();
        let records = paths
            .iter()
            .map(|path| TagRecord::new(path.as_str(), tag).at(revalidated_at))
            .collect();
        if let Err(e) = self.tags.write_tags(records).await {
            tracing::warn!(tag = %tag, error = %e, "Tag watermark update failed");
            return Vec::new();
        }

        for path in &paths {
            enqueue(
                &self.queue,
                QueueMessage {
                    target: RevalidationTarget {
                        host: self.default_host.clone(),
                        url: path.clone(),
                    },
                    dedupe_key: format!("{}:{}", path, revalidated_at),
                    group_key: path.clone(),
                },
            );
        }
        tracing::info!(tag = %tag, paths = paths.len(), "Tag revalidated");
        paths
    }

    /// Revalidate everything rendered for `path` (page and data keys).
    pub async fn revalidate_path(&self, path: &str) -> Vec<String> {
        self.revalidate_tag(&implicit_tag(path)).await
    }
}
