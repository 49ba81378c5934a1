//! Tag cache: tag ↔ path index with per-path revalidation watermarks.
//!
//! # Responsibilities
//! - Answer "which tags does this path carry" and "which paths carry this tag"
//! - Force entries stale when a path was revalidated after they were written
//! - Apply tag batches atomically
//!
//! # Design Decisions
//! - One `RwLock` guards both index directions and the watermarks, so a batch
//!   can never leave an association without its watermark (or the reverse)
//! - Reads return sorted, de-duplicated sets

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::{now_millis, CacheResult};

/// Prefix of the tag every page carries for its own path.
pub const IMPLICIT_TAG_PREFIX: &str = "_N_T_";

/// The implicit tag of `path`. Revalidating a path is revalidating this tag.
pub fn implicit_tag(path: &str) -> String {
    format!("{}{}", IMPLICIT_TAG_PREFIX, path)
}

/// One tag association, as written and as seeded from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub path: String,
    pub tag: String,

    /// Watermark to set on `path`. Defaults to the write time.
    #[serde(default)]
    pub revalidated_at: Option<i64>,
}

impl TagRecord {
    pub fn new(path: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tag: tag.into(),
            revalidated_at: None,
        }
    }

    pub fn at(mut self, revalidated_at: i64) -> Self {
        self.revalidated_at = Some(revalidated_at);
        self
    }
}

#[async_trait]
pub trait TagCache: Send + Sync + Debug {
    async fn get_by_path(&self, path: &str) -> CacheResult<Vec<String>>;

    async fn get_by_tag(&self, tag: &str) -> CacheResult<Vec<String>>;

    /// `-1` when `key` was revalidated after `last_modified`; otherwise
    /// `last_modified`, or now when none is given.
    async fn get_last_modified(&self, key: &str, last_modified: Option<i64>) -> CacheResult<i64>;

    /// Time `key` was last revalidated, if ever.
    async fn get_watermark(&self, key: &str) -> CacheResult<Option<i64>>;

    /// Associate each record's tag and path and bump the path's watermark.
    async fn write_tags(&self, records: Vec<TagRecord>) -> CacheResult<()>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct TagIndex {
    tags_by_path: BTreeMap<String, BTreeSet<String>>,
    paths_by_tag: BTreeMap<String, BTreeSet<String>>,
    revalidated_at: BTreeMap<String, i64>,
}

/// Process-local tag cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryTagCache {
    index: Arc<RwLock<TagIndex>>,
}

impl MemoryTagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache pre-populated from a JSON array of [`TagRecord`]s.
    pub async fn seeded_from_file(path: &Path) -> CacheResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let records: Vec<TagRecord> = serde_json::from_slice(&bytes)?;
        let count = records.len();

        let cache = Self::new();
        cache.write_tags(records).await?;
        tracing::info!(path = %path.display(), records = count, "Tag cache seeded");
        Ok(cache)
    }
}

#[async_trait]
impl TagCache for MemoryTagCache {
    async fn get_by_path(&self, path: &str) -> CacheResult<Vec<String>> {
        let index = self.index.read().await;
        Ok(index
            .tags_by_path
            .get(path)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let index = self.index.read().await;
        Ok(index
            .paths_by_tag
            .get(tag)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_last_modified(&self, key: &str, last_modified: Option<i64>) -> CacheResult<i64> {
        let index = self.index.read().await;
        let candidate = last_modified.unwrap_or_else(now_millis);
        match index.revalidated_at.get(key) {
            Some(&watermark) if watermark > last_modified.unwrap_or(0) => Ok(-1),
            _ => Ok(candidate),
        }
    }

    async fn get_watermark(&self, key: &str) -> CacheResult<Option<i64>> {
        Ok(self.index.read().await.revalidated_at.get(key).copied())
    }

    async fn write_tags(&self, records: Vec<TagRecord>) -> CacheResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let mut index = self.index.write().await;
        for record in records {
            index
                .tags_by_path
                .entry(record.path.clone())
                .or_default()
                .insert(record.tag.clone());
            index
                .paths_by_tag
                .entry(record.tag)
                .or_default()
                .insert(record.path.clone());
            index
                .revalidated_at
                .insert(record.path, record.revalidated_at.unwrap_or(now));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
