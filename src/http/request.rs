//! Internal request model.
//!
//! # Responsibilities
//! - Carry the routing-relevant view of an inbound request (path, query,
//!   headers, cookies) independent of the wire adapter
//! - Produce new values on rewrite instead of mutating in place
//!
//! # Design Decisions
//! - Headers use `HeaderMap` so lookups are case-insensitive
//! - `url` is always `raw_path` plus the serialized query, except for
//!   external rewrites where it holds the absolute destination

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Method};
use url::form_urlencoded;

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A query parameter value. Repeated keys collapse into `Multi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    /// All values in declaration order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(v) => vec![v.as_str()],
            QueryValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                *self = QueryValue::Multi(vec![std::mem::take(first), value]);
            }
            QueryValue::Multi(vs) => vs.push(value),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_string())
    }
}

/// Parsed query string, ordered by key.
pub type Query = BTreeMap<String, QueryValue>;

/// Parse a raw query string (without the leading `?`).
pub fn parse_query(raw: &str) -> Query {
    let mut query = Query::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        match query.get_mut(key.as_ref()) {
            Some(existing) => existing.push(value.into_owned()),
            None => {
                query.insert(key.into_owned(), QueryValue::Single(value.into_owned()));
            }
        }
    }
    query
}

/// Serialize a query map, including the leading `?`. Empty maps yield "".
pub fn query_to_string(query: &Query) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        for v in value.values() {
            serializer.append_pair(key, v);
        }
    }
    format!("?{}", serializer.finish())
}

/// Parse every `Cookie` header into a name -> value map. Later duplicates win.
pub fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// The request as seen by the resolver, normalizer and render capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalRequest {
    pub method: Method,
    pub raw_path: String,
    pub url: String,
    pub headers: HeaderMap,
    pub cookies: BTreeMap<String, String>,
    pub query: Query,
    pub remote_address: String,
    pub body: Bytes,
}

impl InternalRequest {
    /// Build a request from a method and a `path?query` target.
    pub fn new(method: Method, target: &str) -> Self {
        let (raw_path, raw_query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        let raw_path = if raw_path.is_empty() { "/" } else { raw_path };
        Self {
            method,
            raw_path: raw_path.to_string(),
            url: match raw_query {
                Some(q) if !q.is_empty() => format!("{}?{}", raw_path, q),
                _ => raw_path.to_string(),
            },
            headers: HeaderMap::new(),
            cookies: BTreeMap::new(),
            query: raw_query.map(parse_query).unwrap_or_default(),
            remote_address: "0.0.0.0".to_string(),
            body: Bytes::new(),
        }
    }

    /// Convert the parts of an inbound HTTP request.
    pub fn from_parts(parts: &Parts, remote: SocketAddr, body: Bytes) -> Self {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut request = Self::new(parts.method.clone(), target);
        request.headers = parts.headers.clone();
        request.cookies = parse_cookies(&parts.headers);
        request.remote_address = remote.ip().to_string();
        request.body = body;
        request
    }

    /// Add a header, skipping names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Skipping invalid header"),
        }
        self
    }

    /// Add a cookie to the parsed cookie map.
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Return a copy targeting `raw_path`, with the url recomputed from the query.
    pub fn with_path(&self, raw_path: &str) -> Self {
        let mut next = self.clone();
        next.raw_path = raw_path.to_string();
        next.url = format!("{}{}", raw_path, query_to_string(&next.query));
        next
    }

    /// Return a copy with `query` replaced and the url recomputed.
    pub fn with_query(&self, query: Query) -> Self {
        let mut next = self.clone();
        next.query = query;
        next.url = format!("{}{}", next.raw_path, query_to_string(&next.query));
        next
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// The raw query string portion of `url`, without the `?`.
    pub fn raw_query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q)
    }
}
