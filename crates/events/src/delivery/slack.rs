//! Slack incoming-webhook optional target.

use std::time::Duration;

use async_trait::async_trait;
use tidings_core::channels::CHANNEL_SLACK;

use super::{option_str, ChannelError, ChannelMessage, OptionalTarget};

/// HTTP request timeout for a single post.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("Slack request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Slack returned HTTP {0}")]
    HttpStatus(u16),

    #[error("No Slack webhook URL configured")]
    MissingWebhook,
}

// ---------------------------------------------------------------------------
// SlackConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

impl SlackConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SLACK_WEBHOOK_URL` is not set.
    ///
    /// | Variable            | Required | Default |
    /// |---------------------|----------|---------|
    /// | `SLACK_WEBHOOK_URL` | yes      | -       |
    /// | `SLACK_CHANNEL`     | no       | -       |
    /// | `SLACK_USERNAME`    | no       | -       |
    pub fn from_env() -> Option<Self> {
        Some(Self {
            webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok()?,
            channel: std::env::var("SLACK_CHANNEL").ok(),
            username: std::env::var("SLACK_USERNAME").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// SlackTarget
// ---------------------------------------------------------------------------

/// Posts the notification text to a Slack incoming webhook.
///
/// Per-notifiable options `webhook_url`, `channel` and `username`
/// override the configured defaults.
pub struct SlackTarget {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackTarget {
    pub fn new(config: SlackConfig) -> Result<Self, SlackError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn payload(&self, message: &ChannelMessage, options: &serde_json::Value) -> serde_json::Value {
        let mut text = message.text();
        if let Some(path) = &message.notifiable_path {
            text.push('\n');
            text.push_str(path);
        }
        let mut payload = serde_json::json!({ "text": text });
        let channel = option_str(options, "channel").or(self.config.channel.as_deref());
        if let Some(channel) = channel {
            payload["channel"] = channel.into();
        }
        let username = option_str(options, "username").or(self.config.username.as_deref());
        if let Some(username) = username {
            payload["username"] = username.into();
        }
        payload
    }

    async fn post(&self, message: &ChannelMessage, options: &serde_json::Value) -> Result<(), SlackError> {
        let url = option_str(options, "webhook_url").unwrap_or(&self.config.webhook_url);
        if url.is_empty() {
            return Err(SlackError::MissingWebhook);
        }
        let response = self
            .client
            .post(url)
            .json(&self.payload(message, options))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SlackError::HttpStatus(response.status().as_u16()));
        }
        tracing::info!(notification_id = message.notification_id, "Slack message posted");
        Ok(())
    }
}

#[async_trait]
impl OptionalTarget for SlackTarget {
    fn name(&self) -> &str {
        CHANNEL_SLACK
    }

    async fn notify(
        &self,
        message: &ChannelMessage,
        options: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        Ok(self.post(message, options).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
