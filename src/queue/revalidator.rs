//! Revalidation requests.
//!
//! A revalidation is a `HEAD {origin}{url}` carrying the preview id, which
//! makes the gateway bypass its cache read, re-render and store. The origin is
//! fixed at startup (the gateway's own listener unless configured), so nothing
//! in a message decides where the preview id is sent.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::queue::{QueueError, QueueMessage};

/// Header whose value must equal the preview id for a revalidation.
pub const PRERENDER_REVALIDATE_HEADER: &str = "x-prerender-revalidate";

/// Marks a request as ISR-triggered.
pub const ISR_HEADER: &str = "x-isr";

#[async_trait]
pub trait Revalidator: Send + Sync + Debug {
    async fn revalidate(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

#[derive(Debug, Clone)]
pub struct HttpRevalidator {
    client: reqwest::Client,
    origin: String,
    preview_mode_id: String,
}

impl HttpRevalidator {
    pub fn new(origin: &str, preview_mode_id: impl Into<String>, timeout: Duration) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
            preview_mode_id: preview_mode_id.into(),
        })
    }

    /// URL the HEAD request goes to.
    pub fn url_for(&self, message: &QueueMessage) -> String {
        format!("{}{}", self.origin, message.target.url)
    }
}

#[async_trait]
impl Revalidator for HttpRevalidator {
    async fn revalidate(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let url = self.url_for(message);
        tracing::debug!(url = %url, "Revalidating stale page");

        let response = self
            .client
            .head(&url)
            .header(PRERENDER_REVALIDATE_HEADER, &self.preview_mode_id)
            .header(ISR_HEADER, "1")
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(QueueError::Revalidation(format!("{} returned {}", url, status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::Router;
    use std::sync::{Arc, Mutex};

    fn message(host: &str) -> QueueMessage {
        QueueMessage::for_stale_entry(host, "/blog/1", "/blog/1", 7)
    }

    /// Serve `status` to every request and record the request headers.
    async fn target(status: StatusCode) -> (String, Arc<Mutex<Vec<HeaderMap>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let app = Router::new().fallback(move |headers: HeaderMap| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(headers);
                status
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{}", addr), seen)
    }

    #[test]
    fn test_url_ignores_message_host() {
        let revalidator = HttpRevalidator::new("http://127.0.0.1:8080/", "pid", Duration::from_secs(1)).unwrap();
        assert_eq!(revalidator.url_for(&message("evil.example")), "http://127.0.0.1:8080/blog/1");
        assert_eq!(revalidator.url_for(&message("site.test")), "http://127.0.0.1:8080/blog/1");
    }

    #[tokio::test]
    async fn test_success_sends_preview_headers() {
        let (origin, seen) = target(StatusCode::OK).await;
        let revalidator = HttpRevalidator::new(&origin, "pid", Duration::from_secs(1)).unwrap();
        revalidator.revalidate(&message("evil.example")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][PRERENDER_REVALIDATE_HEADER], "pid");
        assert_eq!(seen[0][ISR_HEADER], "1");
        assert_ne!(seen[0]["host"], "evil.example");
    }

    #[tokio::test]
    async fn test_redirect_is_failure() {
        let (origin, _) = target(StatusCode::PERMANENT_REDIRECT).await;
        let revalidator = HttpRevalidator::new(&origin, "pid", Duration::from_secs(1)).unwrap();
        let result = revalidator.revalidate(&message("site.test")).await;
        assert!(matches!(result, Err(QueueError::Revalidation(_))));
    }
}
