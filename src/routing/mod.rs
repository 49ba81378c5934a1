//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming InternalRequest
//!     → resolver.rs (trailing slash, redirects, rewrites, header rules)
//!     → normalizer.rs (data-page fix, fallback:false check)
//!     → Return: Flow::Respond(terminal response) or Flow::Continue(request)
//!
//! Rule Compilation (at startup):
//!     routes manifest + prerender manifest
//!     → template.rs (path templates)
//!     → matcher.rs (compiled regexes and conditions)
//!     → Freeze as immutable RoutingContext
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same input always resolves the same way
//! - First match wins, in declared order
//! - Pure functions: no I/O, safe to call from any task

pub mod context;
pub mod matcher;
pub mod normalizer;
pub mod resolver;
pub mod template;
pub mod types;

use crate::http::response::InternalResponse;

pub use context::RoutingContext;
pub use matcher::{CompiledHeaderRule, CompiledRule, Matcher};
pub use resolver::{resolve, ResolvedRequest};
pub use template::{MatcherError, ParamValue, Params, PathTemplate};
pub use types::{PrerenderManifest, RouteRule, RoutesManifest};

/// Outcome of a routing step: keep going, or answer now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow<T> {
    Continue(T),
    Respond(InternalResponse),
}
