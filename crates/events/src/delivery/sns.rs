//! Amazon SNS optional target.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns::config::Region;
use aws_sdk_sns::error::DisplayErrorContext;
use tidings_core::channels::CHANNEL_AMAZON_SNS;

use super::{option_str, ChannelError, ChannelMessage, OptionalTarget};

/// SNS caps subjects at 100 characters.
const MAX_SUBJECT_LENGTH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum SnsError {
    #[error("SNS publish failed: {0}")]
    Publish(String),

    #[error("No SNS topic, target or phone number configured")]
    MissingDestination,
}

/// Where a message is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnsDestination {
    Topic(String),
    Target(String),
    Phone(String),
}

#[derive(Debug, Clone, Default)]
pub struct SnsConfig {
    pub region: Option<String>,
    pub topic_arn: Option<String>,
}

impl SnsConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` unless `SNS_ENABLED` is `true` or `SNS_TOPIC_ARN` is
    /// set. Credentials come from the standard AWS provider chain.
    ///
    /// | Variable        | Required | Default              |
    /// |-----------------|----------|----------------------|
    /// | `SNS_ENABLED`   | no       | `false`              |
    /// | `SNS_TOPIC_ARN` | no       | -                    |
    /// | `SNS_REGION`    | no       | provider chain value |
    pub fn from_env() -> Option<Self> {
        let topic_arn = std::env::var("SNS_TOPIC_ARN").ok();
        let enabled = std::env::var("SNS_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        if !enabled && topic_arn.is_none() {
            return None;
        }
        Some(Self {
            region: std::env::var("SNS_REGION").ok(),
            topic_arn,
        })
    }
}

/// Publishes the notification text to SNS.
///
/// Per-notifiable options `topic_arn`, `target_arn` or `phone_number`
/// select the destination; the configured topic is the fallback.
pub struct AmazonSnsTarget {
    client: aws_sdk_sns::Client,
    default_topic: Option<String>,
}

impl AmazonSnsTarget {
    pub fn new(client: aws_sdk_sns::Client, default_topic: Option<String>) -> Self {
        Self {
            client,
            default_topic,
        }
    }

    /// Build a client from the AWS provider chain.
    pub async fn connect(config: SnsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.region {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;
        Self::new(aws_sdk_sns::Client::new(&sdk_config), config.topic_arn)
    }

    pub fn destination(&self, options: &serde_json::Value) -> Option<SnsDestination> {
        if let Some(arn) = option_str(options, "topic_arn") {
            return Some(SnsDestination::Topic(arn.to_string()));
        }
        if let Some(arn) = option_str(options, "target_arn") {
            return Some(SnsDestination::Target(arn.to_string()));
        }
        if let Some(phone) = option_str(options, "phone_number") {
            return Some(SnsDestination::Phone(phone.to_string()));
        }
        self.default_topic.clone().map(SnsDestination::Topic)
    }

    async fn publish(
        &self,
        message: &ChannelMessage,
        options: &serde_json::Value,
    ) -> Result<(), SnsError> {
        let destination = self
            .destination(options)
            .ok_or(SnsError::MissingDestination)?;

        let subject = subject_for(&message.notifiable_type);

        let mut request = self.client.publish().message(message.text());
        request = match &destination {
            SnsDestination::Topic(arn) => request.topic_arn(arn).subject(subject),
            SnsDestination::Target(arn) => request.target_arn(arn).subject(subject),
            SnsDestination::Phone(phone) => request.phone_number(phone),
        };

        let output = request
            .send()
            .await
            .map_err(|e| SnsError::Publish(DisplayErrorContext(&e).to_string()))?;

        tracing::info!(
            notification_id = message.notification_id,
            message_id = output.message_id().unwrap_or_default(),
            "SNS message published"
        );
        Ok(())
    }
}

#[async_trait]
impl OptionalTarget for AmazonSnsTarget {
    fn name(&self) -> &str {
        CHANNEL_AMAZON_SNS
    }

    async fn notify(
        &self,
        message: &ChannelMessage,
        options: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        Ok(self.publish(message, options).await?)
    }
}

/// Topic subject, cut to [`MAX_SUBJECT_LENGTH`] characters.
fn subject_for(notifiable_type: &str) -> String {
    format!("Notification of {}", notifiable_type.to_lowercase())
        .chars()
        .take(MAX_SUBJECT_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::delivery::tests::message;

    fn offline_target(default_topic: Option<&str>) -> AmazonSnsTarget {
        let config = aws_sdk_sns::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        AmazonSnsTarget::new(
            aws_sdk_sns::Client::from_conf(config),
            default_topic.map(str::to_string),
        )
    }

    #[test]
    fn destination_prefers_options() {
        let sns = offline_target(Some("arn:default"));
        assert_eq!(
            sns.destination(&json!({ "phone_number": "+15550100" })),
            Some(SnsDestination::Phone("+15550100".into()))
        );
        assert_eq!(
            sns.destination(&json!({ "topic_arn": "arn:t", "target_arn": "arn:x" })),
            Some(SnsDestination::Topic("arn:t".into()))
        );
        assert_eq!(
            sns.destination(&json!({})),
            Some(SnsDestination::Topic("arn:default".into()))
        );
    }

    #[test]
    fn subject_is_cut_on_character_boundaries() {
        assert_eq!(subject_for("Comment"), "Notification of comment");

        let subject = subject_for(&"Ü".repeat(120));
        assert_eq!(subject.chars().count(), MAX_SUBJECT_LENGTH);
        assert!(subject.ends_with('ü'));
    }

    #[tokio::test]
    async fn missing_destination_fails_without_network() {
        let sns = offline_target(None);
        assert_matches!(
            sns.notify(&message(), &json!({})).await,
            Err(ChannelError::Sns(SnsError::MissingDestination))
        );
    }
}
