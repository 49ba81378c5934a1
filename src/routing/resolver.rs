//! Rewrite, redirect and header resolution.
//!
//! # Order
//! 1. Trailing-slash normalization (308)
//! 2. Redirect table, non-internal rules only
//! 3. Rewrite table
//! 4. Header injection, independent of 1-3
//!
//! First match wins inside each table, tables are scanned in declared order.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::http::request::{parse_query, query_to_string, InternalRequest, QueryValue};
use crate::http::response::InternalResponse;
use crate::observability::metrics;
use crate::routing::context::RoutingContext;
use crate::routing::matcher::{substitute, CompiledHeaderRule, CompiledRule, Matcher};
use crate::routing::template::Params;
use crate::routing::types::RouteRule;
use crate::routing::Flow;

/// Header marking client-side data fetches.
pub const NEXT_DATA_HEADER: &str = "x-nextjs-data";

const DEFAULT_REDIRECT_STATUS: u16 = 308;

/// The request after resolution, plus what downstream dispatch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub request: InternalRequest,

    /// Absolute destination of an external rewrite.
    pub external_target: Option<Url>,

    /// The rewrite rule that fired, if any.
    pub matched_rewrite: Option<RouteRule>,

    /// Headers contributed by header rules.
    pub request_headers: HeaderMap,
}

impl ResolvedRequest {
    pub fn is_external_rewrite(&self) -> bool {
        self.external_target.is_some()
    }

    /// External rewrites whose rule is not framework-internal are proxied.
    pub fn should_proxy(&self) -> bool {
        self.is_external_rewrite()
            && !self.matched_rewrite.as_ref().is_some_and(|r| r.internal)
    }
}

/// Result of a single rewrite pass.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub request: InternalRequest,
    pub rule: Option<RouteRule>,
    pub external_target: Option<Url>,
}

enum Destination {
    Local { path: String, query: Option<String> },
    External(Url),
}

/// Classify a destination. Absolute URLs pointing at the request's own host
/// are treated as local.
fn classify_destination(destination: &str, host: Option<&str>) -> Destination {
    let split_local = |target: &str| match target.split_once('?') {
        Some((path, query)) => Destination::Local {
            path: path.to_string(),
            query: Some(query.to_string()),
        },
        None => Destination::Local {
            path: target.to_string(),
            query: None,
        },
    };

    if !(destination.starts_with("http://") || destination.starts_with("https://")) {
        return split_local(destination);
    }
    let url = match Url::parse(destination) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(destination = %destination, error = %e, "Unparseable external destination");
            return split_local(destination);
        }
    };
    let request_host = host.map(|h| h.split(':').next().unwrap_or(h));
    if url.host_str().is_some() && url.host_str() == request_host {
        return Destination::Local {
            path: url.path().to_string(),
            query: url.query().map(str::to_string),
        };
    }
    Destination::External(url)
}

/// Merge templated destination query pairs over the request query.
fn merge_query(req: &InternalRequest, destination_query: Option<&str>, params: &Params) -> crate::http::request::Query {
    let mut query = req.query.clone();
    if let Some(raw) = destination_query {
        for (key, value) in parse_query(raw) {
            let value = match value {
                QueryValue::Single(v) => QueryValue::Single(substitute(&v, params)),
                QueryValue::Multi(vs) => {
                    QueryValue::Multi(vs.iter().map(|v| substitute(v, params)).collect())
                }
            };
            query.insert(key, value);
        }
    }
    query
}

/// Apply the first matching rule of `rules`. No match returns the request as is.
pub fn handle_rewrites<'a>(
    req: &InternalRequest,
    rules: impl IntoIterator<Item = &'a CompiledRule>,
) -> RewriteOutcome {
    let Some(rule) = rules.into_iter().find(|r| r.matches(req)) else {
        return RewriteOutcome {
            request: req.clone(),
            rule: None,
            external_target: None,
        };
    };

    let params = rule.params(req);
    let outcome = match classify_destination(&rule.rule.destination, req.host()) {
        Destination::Local { path, query } => {
            let path = substitute(&path, &params);
            let query = merge_query(req, query.as_deref(), &params);
            RewriteOutcome {
                request: req.with_query(query).with_path(&path),
                rule: Some(rule.rule.clone()),
                external_target: None,
            }
        }
        Destination::External(mut url) => {
            let path = substitute(url.path(), &params);
            let query = merge_query(req, url.query(), &params);
            url.set_path(&path);
            let serialized = query_to_string(&query);
            url.set_query(serialized.strip_prefix('?'));

            let mut request = req.with_query(query);
            request.raw_path = url.path().to_string();
            request.url = url.to_string();
            RewriteOutcome {
                request,
                rule: Some(rule.rule.clone()),
                external_target: Some(url),
            }
        }
    };

    tracing::debug!(
        from = %req.url,
        to = %outcome.request.url,
        external = outcome.external_target.is_some(),
        "Rewrite matched"
    );
    outcome
}

/// `[\w-]+\.\w+$` on the last path segment.
fn is_file_like(path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let Some((stem, ext)) = segment.rsplit_once('.') else {
        return false;
    };
    let word = |c: char| c.is_alphanumeric() || c == '_';
    !ext.is_empty()
        && ext.chars().all(word)
        && stem.chars().last().is_some_and(|c| word(c) || c == '-')
}

/// Enforce the trailing-slash policy with a 308.
pub fn handle_trailing_slash_redirect(
    ctx: &RoutingContext,
    req: &InternalRequest,
) -> Option<InternalResponse> {
    if req.url.starts_with("http://")
        || req.url.starts_with("https://")
        || req.url.starts_with("//")
        || ctx.skip_trailing_slash_redirect
        || req.raw_path.starts_with(&ctx.api_prefix())
    {
        return None;
    }

    let (path, query) = match req.url.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path, format!("?{}", query)),
        Some((path, _)) => (path, String::new()),
        None => (req.url.as_str(), String::new()),
    };

    let location = if ctx.trailing_slash
        && req.header(NEXT_DATA_HEADER).is_none()
        && !req.raw_path.ends_with('/')
        && !is_file_like(&req.raw_path)
    {
        format!("{}/{}", path, query)
    } else if !ctx.trailing_slash && req.raw_path.ends_with('/') && req.raw_path != "/" {
        format!("{}{}", path.strip_suffix('/').unwrap_or(path), query)
    } else {
        return None;
    };

    tracing::debug!(from = %req.url, to = %location, "Trailing slash redirect");
    metrics::record_redirect("trailing_slash");
    Some(InternalResponse::redirect(DEFAULT_REDIRECT_STATUS, &location))
}

/// Trailing-slash policy, then the first matching non-internal redirect rule.
pub fn handle_redirects(ctx: &RoutingContext, req: &InternalRequest) -> Option<InternalResponse> {
    if let Some(redirect) = handle_trailing_slash_redirect(ctx, req) {
        return Some(redirect);
    }

    let outcome = handle_rewrites(req, ctx.redirects.iter().filter(|r| !r.rule.internal));
    let rule = outcome.rule?;
    let status = rule.status_code.unwrap_or(DEFAULT_REDIRECT_STATUS);
    tracing::debug!(source = %rule.source, location = %outcome.request.url, status, "Redirect matched");
    metrics::record_redirect("rule");
    Some(InternalResponse::redirect(status, &outcome.request.url))
}

/// Collect request headers from every matching header rule. Later rules
/// overwrite earlier ones for the same key.
pub fn add_config_headers(req: &InternalRequest, rules: &[CompiledHeaderRule]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for rule in rules.iter().filter(|r| r.matches(req)) {
        let params = rule.params(req);
        for entry in &rule.rule.headers {
            let key = substitute(&entry.key, &params);
            let value = substitute(&entry.value, &params);
            let parsed = HeaderName::from_bytes(key.to_ascii_lowercase().as_bytes())
                .ok()
                .zip(HeaderValue::from_str(&value).ok())
                .or_else(|| {
                    tracing::debug!(key = %entry.key, value = %entry.value, "Error matching header, using literal");
                    HeaderName::from_bytes(entry.key.to_ascii_lowercase().as_bytes())
                        .ok()
                        .zip(HeaderValue::from_str(&entry.value).ok())
                });
            match parsed {
                Some((name, value)) => {
                    headers.insert(name, value);
                }
                None => tracing::warn!(key = %entry.key, "Skipping invalid configured header"),
            }
        }
    }
    headers
}

/// Run the full resolution pipeline.
pub fn resolve(ctx: &RoutingContext, req: &InternalRequest) -> Flow<ResolvedRequest> {
    if let Some(redirect) = handle_redirects(ctx, req) {
        return Flow::Respond(redirect);
    }

    let request_headers = add_config_headers(req, &ctx.headers);
    let outcome = handle_rewrites(req, &ctx.rewrites);

    Flow::Continue(ResolvedRequest {
        request: outcome.request,
        external_target: outcome.external_target,
        matched_rewrite: outcome.rule,
        request_headers,
    })
}
