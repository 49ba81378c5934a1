//! Render capability.
//!
//! # Responsibilities
//! - Forward a resolved request to the rendering server and buffer its reply
//! - Proxy external rewrites to their destination origin
//! - Map transport failures to typed errors with a response status
//!
//! # Design Decisions
//! - The upstream client is a pooled hyper-util client, shared by all requests
//! - Every call is bounded by the upstream timeout
//! - Hop-by-hop headers are stripped in both directions

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use url::Url;

use crate::http::request::{InternalRequest, X_REQUEST_ID};
use crate::http::response::InternalResponse;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid render target: {0}")]
    InvalidTarget(String),
}

impl RenderError {
    /// Status the client sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RenderError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RenderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RenderError::InvalidTarget(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> InternalResponse {
        InternalResponse::text(self.status(), self.to_string())
    }
}

/// Produces the response for a local (non-proxied) request.
#[async_trait]
pub trait Renderer: Send + Sync + Debug {
    async fn render(&self, req: &InternalRequest) -> Result<InternalResponse, RenderError>;
}

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Forwards to the rendering server over HTTP.
#[derive(Debug, Clone)]
pub struct UpstreamRenderer {
    client: Client<HttpConnector, Body>,
    base: String,
    timeout: Duration,
}

impl UpstreamRenderer {
    pub fn new(upstream: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self, RenderError> {
        let base = upstream.trim_end_matches('/').to_string();
        base.parse::<Uri>()
            .map_err(|e| RenderError::InvalidTarget(format!("{}: {}", upstream, e)))?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self { client, base, timeout })
    }

    fn build_request(&self, req: &InternalRequest) -> Result<Request<Body>, RenderError> {
        let uri: Uri = format!("{}{}", self.base, req.url)
            .parse()
            .map_err(|e| RenderError::InvalidTarget(format!("{}: {}", req.url, e)))?;

        let mut builder = Request::builder().method(req.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(req.headers.clone());
            strip_hop_by_hop(headers);
            headers.remove(header::CONTENT_LENGTH);
        }
        builder
            .body(Body::from(req.body.clone()))
            .map_err(|e| RenderError::InvalidTarget(e.to_string()))
    }
}

#[async_trait]
impl Renderer for UpstreamRenderer {
    async fn render(&self, req: &InternalRequest) -> Result<InternalResponse, RenderError> {
        let request = self.build_request(req)?;
        let request_id = req.header(X_REQUEST_ID).unwrap_or("unknown");

        tracing::debug!(request_id = %request_id, method = %req.method, url = %req.url, "Rendering upstream");

        let response: hyper::Response<hyper::body::Incoming> =
            tokio::time::timeout(self.timeout, self.client.request(request))
                .await
                .map_err(|_| RenderError::Timeout(self.timeout))?
                .map_err(|e| RenderError::Upstream(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = tokio::time::timeout(self.timeout, axum::body::to_bytes(Body::new(body), usize::MAX))
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))?
            .map_err(|e| RenderError::Upstream(e.to_string()))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        Ok(InternalResponse {
            status: parts.status,
            headers,
            body,
            is_base64_encoded: false,
        })
    }
}

/// Fetches external rewrite destinations.
#[derive(Debug, Clone)]
pub struct ExternalProxy {
    client: reqwest::Client,
    timeout: Duration,
}

impl ExternalProxy {
    pub fn new(timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RenderError::InvalidTarget(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub async fn proxy(&self, req: &InternalRequest, target: &Url) -> Result<InternalResponse, RenderError> {
        let mut headers = req.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!(method = %req.method, target = %target, "Proxying external rewrite");

        let response = self
            .client
            .request(req.method.clone(), target.as_str())
            .headers(headers)
            .body(req.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RenderError::Timeout(self.timeout)
                } else {
                    RenderError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body: Bytes = response
            .bytes()
            .await
            .map_err(|e| RenderError::Upstream(e.to_string()))?;

        Ok(InternalResponse {
            status,
            headers,
            body,
            is_base64_encoded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_error_statuses() {
        assert_eq!(RenderError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            RenderError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            RenderError::InvalidTarget("x".into()).into_response().status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_build_request_targets_upstream() {
        let renderer = UpstreamRenderer::new(
            "http://127.0.0.1:3000/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        let req = InternalRequest::new(Method::GET, "/blog?x=1")
            .with_header("host", "site.test")
            .with_header("connection", "keep-alive");

        let request = renderer.build_request(&req).unwrap();
        assert_eq!(request.uri(), "http://127.0.0.1:3000/blog?x=1");
        assert_eq!(request.headers().get("host").unwrap(), "site.test");
        assert!(request.headers().get("connection").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let renderer = UpstreamRenderer::new(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = renderer
            .render(&InternalRequest::new(Method::GET, "/"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
