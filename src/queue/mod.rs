//! Revalidation queue subsystem.
//!
//! # Data Flow
//! ```text
//! stale cache read / admin revalidation
//!     → enqueue() (detached task, never awaited by the request)
//!     → RevalidationQueue::send
//!         memory.rs:  dedupe window → bounded channel → workers (one per group)
//!         http.rs:    SQS SendMessage to an external transport
//!     → revalidator.rs (HEAD {origin}{url} with the preview header)
//!     → gateway re-renders and stores the page
//! ```
//!
//! # Design Decisions
//! - Transports own dedupe/group semantics; the engine never locks per key
//! - Enqueue failures are logged and swallowed

pub mod http;
pub mod memory;
pub mod revalidator;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::metrics;

pub use http::SqsHttpQueue;
pub use memory::MemoryQueue;
pub use revalidator::{HttpRevalidator, Revalidator};

/// Where a revalidation request goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevalidationTarget {
    pub host: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub target: RevalidationTarget,

    /// Messages with the same key inside the dedupe window collapse to one.
    pub dedupe_key: String,

    /// At most one message per group is processed at a time.
    pub group_key: String,
}

impl QueueMessage {
    /// Message for a stale cache entry: one job per `(key, generation)`,
    /// serialized per key. `generation` is the entry's write time, or the tag
    /// watermark that forced it stale.
    pub fn for_stale_entry(host: &str, url: &str, key: &str, generation: i64) -> Self {
        Self {
            target: RevalidationTarget {
                host: host.to_string(),
                url: url.to_string(),
            },
            dedupe_key: format!("{}:{}", key, generation),
            group_key: key.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// The transport could not be reached.
    #[error("queue transport error: {0}")]
    Transport(String),

    /// The transport refused the message (full, bad status).
    #[error("queue rejected message: {0}")]
    Rejected(String),

    /// The revalidation request itself failed.
    #[error("revalidation failed: {0}")]
    Revalidation(String),
}

#[async_trait]
pub trait RevalidationQueue: Send + Sync + Debug {
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError>;

    fn name(&self) -> &'static str;
}

/// Fire-and-forget enqueue. The outcome is logged, never returned.
pub fn enqueue(queue: &Arc<dyn RevalidationQueue>, message: QueueMessage) {
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        let url = message.target.url.clone();
        match queue.send(message).await {
            Ok(()) => tracing::debug!(url = %url, queue = queue.name(), "Revalidation enqueued"),
            Err(e) => {
                metrics::record_revalidation("enqueue_failed");
                tracing::warn!(url = %url, queue = queue.name(), error = %e, "Failed to enqueue revalidation");
            }
        }
    });
}
