//! Incremental cache capability and the in-memory backend.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::key::namespaced;
use crate::cache::{CacheEntry, CacheError, CacheResult, CacheVariant};

/// Key/value store for rendered artifacts.
///
/// Implementations namespace keys by build id. Reads of absent keys fail with
/// [`CacheError::NotFound`].
#[async_trait]
pub trait IncrementalCache: Send + Sync + Debug {
    async fn get(&self, key: &str, variant: CacheVariant) -> CacheResult<CacheEntry>;

    /// Store `value`, stamping it with the current time. Last writer wins.
    async fn set(&self, key: &str, variant: CacheVariant, value: serde_json::Value) -> CacheResult<()>;

    /// Remove every variant stored under `key`. Tag associations are kept.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Backend name for logs and the admin API.
    fn name(&self) -> &'static str;
}

/// Process-local backend on a sharded concurrent map.
#[derive(Debug, Clone)]
pub struct MemoryIncrementalCache {
    build_id: String,
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryIncrementalCache {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IncrementalCache for MemoryIncrementalCache {
    async fn get(&self, key: &str, variant: CacheVariant) -> CacheResult<CacheEntry> {
        let full_key = namespaced(&self.build_id, variant, key);
        self.entries
            .get(&full_key)
            .map(|entry| entry.value().clone())
            .ok_or(CacheError::NotFound(full_key))
    }

    async fn set(&self, key: &str, variant: CacheVariant, value: serde_json::Value) -> CacheResult<()> {
        let full_key = namespaced(&self.build_id, variant, key);
        self.entries.insert(full_key, CacheEntry::new(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        for variant in CacheVariant::ALL {
            self.entries.remove(&namespaced(&self.build_id, variant, key));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::now_millis;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_stamps_time() {
        let cache = MemoryIncrementalCache::new("b1");
        let before = now_millis();
        cache.set("/about", CacheVariant::Page, json!({"html": "<p>hi</p>"})).await.unwrap();

        let entry = cache.get("/about", CacheVariant::Page).await.unwrap();
        assert_eq!(entry.value, json!({"html": "<p>hi</p>"}));
        assert!(entry.last_modified >= before);
    }

    #[tokio::test]
    async fn test_variants_are_separate() {
        let cache = MemoryIncrementalCache::new("b1");
        cache.set("k", CacheVariant::Fetch, json!(1)).await.unwrap();
        assert!(matches!(
            cache.get("k", CacheVariant::Page).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_last_writer_wins_and_delete() {
        let cache = MemoryIncrementalCache::new("b1");
        cache.set("k", CacheVariant::Page, json!("a")).await.unwrap();
        cache.set("k", CacheVariant::Page, json!("b")).await.unwrap();
        cache.set("k", CacheVariant::Fetch, json!("c")).await.unwrap();
        assert_eq!(cache.get("k", CacheVariant::Page).await.unwrap().value, json!("b"));
        assert_eq!(cache.len(), 2);

        cache.delete("k").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_builds_do_not_collide() {
        let old = MemoryIncrementalCache::new("old");
        old.set("/", CacheVariant::Page, json!("old")).await.unwrap();
        let new = MemoryIncrementalCache {
            build_id: "new".into(),
            entries: old.entries.clone(),
        };
        assert!(new.get("/", CacheVariant::Page).await.is_err());
    }
}
