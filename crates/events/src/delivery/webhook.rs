//! Webhook optional target with exponential-backoff retry.
//!
//! [`WebhookTarget`] sends the JSON-encoded [`ChannelMessage`] to an
//! external URL via HTTP POST. Failed attempts are retried up to three
//! times with exponential backoff (1 s, 2 s, 4 s).

use std::time::Duration;

use async_trait::async_trait;
use tidings_core::channels::CHANNEL_WEBHOOK;

use super::{option_str, ChannelError, ChannelMessage, OptionalTarget};

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error("No webhook URL configured")]
    MissingUrl,
}

// ---------------------------------------------------------------------------
// WebhookTarget
// ---------------------------------------------------------------------------

/// Delivers notifications to external webhook endpoints.
///
/// The per-notifiable `url` option overrides the default URL.
pub struct WebhookTarget {
    client: reqwest::Client,
    default_url: Option<String>,
    retry_delays: Vec<Duration>,
}

impl WebhookTarget {
    pub fn new(default_url: Option<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            default_url,
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Replace the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Deliver a message to `url`, retrying on failure.
    ///
    /// Returns `Ok(())` on the first successful attempt.
    pub async fn deliver(&self, url: &str, message: &ChannelMessage) -> Result<(), WebhookError> {
        let payload = serde_json::json!({
            "event_type": "notification.delivered",
            "text": message.text(),
            "notification": message,
        });

        let mut last_err: Option<WebhookError> = None;

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(url, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(url, &payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(url, error = %e, "Webhook delivery failed after all retries");
                Err(last_err.unwrap_or(e))
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl OptionalTarget for WebhookTarget {
    fn name(&self) -> &str {
        CHANNEL_WEBHOOK
    }

    async fn notify(
        &self,
        message: &ChannelMessage,
        options: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        let url = option_str(options, "url")
            .or(self.default_url.as_deref())
            .ok_or(WebhookError::MissingUrl)?;
        Ok(self.deliver(url, message).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
