//! Internal response model.
//!
//! # Responsibilities
//! - Represent terminal results (redirects, 404s) and rendered responses
//! - Convert into an Axum response at the edge
//!
//! # Design Decisions
//! - `HeaderMap` keeps multi-valued headers such as `Set-Cookie` ordered
//! - Bodies flagged as base64 are decoded only when written to the wire

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;

/// A response produced by the routing engine or the render capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub is_base64_encoded: bool,
}

impl InternalResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            is_base64_encoded: false,
        }
    }

    /// Plain-text response.
    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status)
            .with_header(header::CONTENT_TYPE.as_str(), "text/plain; charset=utf-8")
            .with_body(body)
    }

    /// Redirect with an empty body. Unknown codes fall back to 308.
    pub fn redirect(status_code: u16, location: &str) -> Self {
        let status = StatusCode::from_u16(status_code)
            .ok()
            .filter(StatusCode::is_redirection)
            .unwrap_or(StatusCode::PERMANENT_REDIRECT);
        let mut response = Self::new(status);
        // from_bytes accepts non-ASCII destinations that from_str would reject.
        match HeaderValue::from_bytes(location.as_bytes()) {
            Ok(value) => {
                response.headers.insert(header::LOCATION, value);
            }
            Err(_) => tracing::warn!(location = %location, "Dropping invalid redirect location"),
        }
        response
    }

    /// `404` with an empty JSON object, used for stale data requests.
    pub fn not_found_json() -> Self {
        Self::new(StatusCode::NOT_FOUND)
            .with_header(header::CONTENT_TYPE.as_str(), "application/json")
            .with_body("{}")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Location` header of a redirect.
    pub fn location(&self) -> Option<&str> {
        self.header(header::LOCATION.as_str())
    }

    /// Body bytes as they should go on the wire.
    pub fn decoded_body(&self) -> Bytes {
        if !self.is_base64_encoded {
            return self.body.clone();
        }
        match base64::engine::general_purpose::STANDARD.decode(&self.body) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Body flagged as base64 failed to decode");
                self.body.clone()
            }
        }
    }
}

impl IntoResponse for InternalResponse {
    fn into_response(self) -> Response {
        let body = self.decoded_body();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_sets_location() {
        let res = InternalResponse::redirect(307, "/target?a=1");
        assert_eq!(res.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.location(), Some("/target?a=1"));
        assert!(res.body.is_empty());
    }

    #[test]
    fn test_redirect_rejects_non_redirect_status() {
        let res = InternalResponse::redirect(200, "/x");
        assert_eq!(res.status, StatusCode::PERMANENT_REDIRECT);
    }

    #[test]
    fn test_not_found_json() {
        let res = InternalResponse::not_found_json();
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.body, Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_base64_body_is_decoded() {
        let mut res = InternalResponse::new(StatusCode::OK).with_body("aGVsbG8=");
        res.is_base64_encoded = true;
        assert_eq!(res.decoded_body(), Bytes::from_static(b"hello"));
    }
}
