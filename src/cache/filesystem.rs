//! Filesystem incremental cache backend.
//!
//! # Layout
//! ```text
//! {root}/{build_id}/{variant}/{base64url(key)}.json  →  CacheEntry envelope
//! ```
//!
//! # Design Decisions
//! - Writes go to a uniquely named temp file, then `rename` replaces the
//!   target, so readers see the old or the new entry and never a partial one
//! - Unreadable or corrupt files read as a miss

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::cache::incremental::IncrementalCache;
use crate::cache::key::{file_name, namespaced};
use crate::cache::{CacheEntry, CacheError, CacheResult, CacheVariant};

#[derive(Debug, Clone)]
pub struct FileIncrementalCache {
    build_id: String,
    root: PathBuf,
}

impl FileIncrementalCache {
    pub fn new(root: impl Into<PathBuf>, build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            root: root.into(),
        }
    }

    fn dir(&self, variant: CacheVariant) -> PathBuf {
        self.root.join(&self.build_id).join(variant.as_str())
    }

    fn path(&self, key: &str, variant: CacheVariant) -> PathBuf {
        self.dir(variant).join(file_name(key))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl IncrementalCache for FileIncrementalCache {
    async fn get(&self, key: &str, variant: CacheVariant) -> CacheResult<CacheEntry> {
        let path = self.path(key, variant);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotFound(namespaced(&self.build_id, variant, key)));
            }
            Err(e) => return Err(CacheError::Io(e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn set(&self, key: &str, variant: CacheVariant, value: serde_json::Value) -> CacheResult<()> {
        let dir = self.dir(variant);
        tokio::fs::create_dir_all(&dir).await?;

        let target = self.path(key, variant);
        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let body = serde_json::to_vec(&CacheEntry::new(value))?;

        tokio::fs::write(&temp, &body).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::Io(e));
        }

        tracing::debug!(key = %key, variant = %variant, path = %target.display(), "Cache entry written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        for variant in CacheVariant::ALL {
            match tokio::fs::remove_file(self.path(key, variant)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::Io(e)),
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}
