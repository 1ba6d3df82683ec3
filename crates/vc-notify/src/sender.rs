use crate::payload::WebhookPayload;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, warn};
use vc_core::secrets::Secret;

/// Outcome class of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    Retryable,
    Fatal,
}

/// Delivery capability, abstracted for tests. The returned duration is the
/// server-requested retry delay, when one was given.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, payload: &WebhookPayload) -> (SendResult, Option<Duration>);
}

/// HTTP webhook sender. The URL is held as a [`Secret`] so it cannot leak
/// through logs.
pub struct WebhookSender {
    webhook_url: Secret,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(webhook_url: Secret) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            webhook_url,
            client,
        }
    }

    pub fn with_client(webhook_url: Secret, client: reqwest::Client) -> Self {
        Self {
            webhook_url,
            client,
        }
    }
}

#[async_trait]
impl Sender for WebhookSender {
    async fn send(&self, payload: &WebhookPayload) -> (SendResult, Option<Duration>) {
        if self.webhook_url.is_empty() {
            warn!("webhook URL not configured");
            return (SendResult::Fatal, None);
        }

        let response = match self
            .client
            .post(self.webhook_url.expose())
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "webhook request failed");
                return (SendResult::Retryable, None);
            }
        };

        let status = response.status();
        match status.as_u16() {
            200..=299 => {
                debug!(status = status.as_u16(), "webhook delivered");
                (SendResult::Ok, None)
            }
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_retry_after);
                warn!(retry_after = ?retry_after, "webhook rate limited");
                (SendResult::Retryable, retry_after)
            }
            400..=499 => {
                // Bad webhook or revoked auth; retrying will never help.
                error!(status = status.as_u16(), "webhook client error");
                (SendResult::Fatal, None)
            }
            _ => {
                warn!(status = status.as_u16(), "webhook server error");
                (SendResult::Retryable, None)
            }
        }
    }
}

/// `Retry-After` arrives as integer or decimal seconds.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
