//! Cache subsystem.
//!
//! # Data Flow
//! ```text
//! IsrRenderer / admin API
//!     → coordinator.rs (best-effort policy: errors degrade, never surface)
//!         → incremental.rs / filesystem.rs (key → CacheEntry)
//!         → tag.rs (tag ↔ path index + revalidation watermarks)
//!         → queue (fire-and-forget revalidation)
//! ```
//!
//! # Design Decisions
//! - Backends are capability traits selected at startup by name
//! - Keys are namespaced `{build_id}:{variant}:{key}` so builds never collide
//! - Cache errors are values; only the coordinator decides to log and continue

pub mod coordinator;
pub mod filesystem;
pub mod incremental;
pub mod key;
pub mod tag;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use coordinator::CacheCoordinator;
pub use filesystem::FileIncrementalCache;
pub use incremental::{IncrementalCache, MemoryIncrementalCache};
pub use tag::{implicit_tag, MemoryTagCache, TagCache, TagRecord};

/// Which kind of cached artifact a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheVariant {
    /// Rendered page or data response.
    Page,
    /// Data-fetch result cached by the renderer.
    Fetch,
}

impl CacheVariant {
    pub const ALL: [CacheVariant; 2] = [CacheVariant::Page, CacheVariant::Fetch];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheVariant::Page => "page",
            CacheVariant::Fetch => "fetch",
        }
    }
}

impl fmt::Display for CacheVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached value and the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: serde_json::Value,

    /// Epoch milliseconds. `-1` after a tag watermark forced the entry stale.
    pub last_modified: i64,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            last_modified: now_millis(),
        }
    }

    pub fn is_forced_stale(&self) -> bool {
        self.last_modified < 0
    }
}

/// Errors from cache and tag backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry for the key. Callers render fresh.
    #[error("cache entry not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or refused the operation.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
