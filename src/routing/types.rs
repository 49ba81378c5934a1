//! Rule-table and manifest shapes as they appear in the JSON sources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a `has`/`missing` condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Header,
    Cookie,
    Query,
    Host,
}

/// Condition value: one regex, or (for query conditions) alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConditionValue {
    One(String),
    AnyOf(Vec<String>),
}

/// A single `has`/`missing` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteHas {
    #[serde(rename = "type")]
    pub kind: ConditionKind,

    /// Header/cookie/query name. Unused for `host`.
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub value: Option<ConditionValue>,
}

/// A rewrite or redirect rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Path template the request is matched against for parameter capture.
    pub source: String,

    /// Destination template (path, `path?query`, or absolute URL).
    pub destination: String,

    /// Precondition regex tested against the raw path.
    pub regex: String,

    #[serde(default)]
    pub has: Vec<RouteHas>,

    #[serde(default)]
    pub missing: Vec<RouteHas>,

    /// Redirect status code (default 308).
    #[serde(default)]
    pub status_code: Option<u16>,

    /// Framework-generated rule; never emitted as a user redirect.
    #[serde(default)]
    pub internal: bool,
}

/// One header produced by a header rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

/// A header-injection rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeaderRule {
    pub source: String,
    pub regex: String,

    #[serde(default)]
    pub has: Vec<RouteHas>,

    #[serde(default)]
    pub missing: Vec<RouteHas>,

    pub headers: Vec<HeaderEntry>,
}

/// The rule tables loaded at startup. Order inside each list is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoutesManifest {
    #[serde(default)]
    pub headers: Vec<HeaderRule>,

    #[serde(default)]
    pub rewrites: Vec<RouteRule>,

    #[serde(default)]
    pub redirects: Vec<RouteRule>,
}

/// Static-generation fallback setting of a dynamic route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Fallback {
    Flag(bool),
    Page(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRoute {
    /// `null` in the manifest means "blocking".
    #[serde(default)]
    pub fallback: Option<Fallback>,

    pub route_regex: String,
}

impl DynamicRoute {
    /// True for `fallback: false`, the only setting that 404s unknown paths.
    pub fn is_fallback_disabled(&self) -> bool {
        matches!(self.fallback, Some(Fallback::Flag(false)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewProps {
    #[serde(default)]
    pub preview_mode_id: String,
}

/// Precomputed routes produced by the build.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerenderManifest {
    #[serde(default)]
    pub dynamic_routes: BTreeMap<String, DynamicRoute>,

    #[serde(default)]
    pub routes: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub preview: PreviewProps,
}
