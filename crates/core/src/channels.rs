//! Well-known delivery channel names.
//!
//! The email channel is the default channel. Everything else is an
//! optional target whose name is used as the key of
//! `subscriptions.optional_targets` and of the optional target registry.

/// Default channel: notification email via SMTP.
pub const CHANNEL_EMAIL: &str = "email";

/// Batch email sent by the batch scheduler for grouped notifications.
pub const CHANNEL_BATCH_EMAIL: &str = "batch_email";

/// Optional target: Slack incoming webhook.
pub const CHANNEL_SLACK: &str = "slack";

/// Optional target: Amazon SNS publish (topic, endpoint or SMS).
pub const CHANNEL_AMAZON_SNS: &str = "amazon_sns";

/// Optional target: generic JSON webhook.
pub const CHANNEL_WEBHOOK: &str = "webhook";

/// Maximum length of an optional target name.
pub const MAX_OPTIONAL_TARGET_NAME_LENGTH: usize = 64;

/// Validate an optional target name: non-empty snake_case identifier.
pub fn validate_optional_target_name(name: &str) -> Result<(), crate::error::CoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_OPTIONAL_TARGET_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(crate::error::CoreError::Validation(format!(
            "Invalid optional target name '{name}'"
        )));
    }
    if name == CHANNEL_EMAIL {
        return Err(crate::error::CoreError::Validation(
            "'email' is the default channel, not an optional target".to_string(),
        ));
    }
    Ok(())
}
