//! SQS-compatible HTTP transport.
//!
//! Posts an `AmazonSQS.SendMessage` JSON call. Dedupe and group semantics are
//! provided by the receiving FIFO queue.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::schema::QueueConfig;
use crate::observability::metrics;
use crate::queue::{QueueError, QueueMessage, RevalidationQueue};
use crate::resilience::{retry, RetryPolicy};

const AMZ_TARGET: &str = "AmazonSQS.SendMessage";
const AMZ_JSON: &str = "application/x-amz-json-1.0";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest<'a> {
    queue_url: &'a str,
    message_body: String,
    message_deduplication_id: &'a str,
    message_group_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct SqsHttpQueue {
    client: reqwest::Client,
    endpoint: String,
    queue_url: String,
    policy: RetryPolicy,
}

impl SqsHttpQueue {
    pub fn new(config: &QueueConfig, policy: RetryPolicy, timeout: Duration) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            queue_url: config.queue_url.clone(),
            policy,
        })
    }

    async fn post(&self, body: &SendMessageRequest<'_>) -> Result<(), QueueError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON)
            .header("X-Amz-Target", AMZ_TARGET)
            .json(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(QueueError::Rejected(format!("SendMessage returned {}", status)))
        }
    }
}

/// SQS body for `message`. The message body is the JSON-encoded target.
fn send_message_request<'a>(
    queue_url: &'a str,
    message: &'a QueueMessage,
) -> Result<SendMessageRequest<'a>, QueueError> {
    let message_body =
        serde_json::to_string(&message.target).map_err(|e| QueueError::Rejected(e.to_string()))?;
    Ok(SendMessageRequest {
        queue_url,
        message_body,
        message_deduplication_id: &message.dedupe_key,
        message_group_id: &message.group_key,
    })
}

#[async_trait]
impl RevalidationQueue for SqsHttpQueue {
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError> {
        let body = send_message_request(&self.queue_url, &message)?;
        retry(self.policy, "sqs-send", |_| self.post(&body)).await?;
        metrics::record_revalidation("enqueued");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqs-http"
    }
}
