//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a background collaborator (revalidation target, queue endpoint):
//!     → retries.rs (retry with backoff until the attempt budget is spent)
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Retries only for background work; client requests are never retried
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod retries;

pub use retries::{retry, RetryPolicy};
