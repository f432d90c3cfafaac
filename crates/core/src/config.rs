//! Immutable activity notification configuration.
//!
//! [`ActivityConfig`] is built once at process start (usually via
//! [`ActivityConfig::from_env`]) and shared behind an `Arc` by every
//! component. Nothing mutates it afterwards.

use std::time::Duration;

use crate::error::CoreError;

/// Default number of opened notifications returned by "recently opened"
/// queries and by the opened half of a target's notification index.
pub const DEFAULT_OPENED_INDEX_LIMIT: i64 = 10;

/// Default sender address for notification emails.
pub const DEFAULT_MAILER_SENDER: &str = "notifications@tidings.local";

/// Service-wide notification settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityConfig {
    /// Master switch. When `false`, `notify` stores and delivers nothing.
    pub enabled: bool,
    /// Default for target and notifiable `email_allowed` policies.
    pub email_enabled: bool,
    /// Defer email for notifications merged into an existing group until
    /// the batch scheduler flushes them.
    pub batch_email_enabled: bool,
    /// Whether subscription records are consulted at all.
    pub subscription_enabled: bool,
    /// `subscribing` value used when no subscription row exists.
    pub subscribe_as_default: bool,
    /// `subscribing_to_email` value used when no subscription row exists.
    pub subscribe_to_email_as_default: bool,
    /// Optional target `subscribing` value used when no entry exists.
    pub subscribe_to_optional_targets_as_default: bool,
    /// Grouping lookback. `None` means unbounded.
    pub group_expiry_delay: Option<Duration>,
    /// Page size for opened notification queries.
    pub opened_index_limit: i64,
    /// RFC 5322 "From" address for notification emails.
    pub mailer_sender: String,
    /// Optional "Reply-To" address for notification emails.
    pub mailer_reply_to: Option<String>,
    /// Dispatch through the background delivery worker instead of inline.
    pub notify_later: bool,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email_enabled: false,
            batch_email_enabled: false,
            subscription_enabled: false,
            subscribe_as_default: true,
            subscribe_to_email_as_default: true,
            subscribe_to_optional_targets_as_default: true,
            group_expiry_delay: None,
            opened_index_limit: DEFAULT_OPENED_INDEX_LIMIT,
            mailer_sender: DEFAULT_MAILER_SENDER.to_string(),
            mailer_reply_to: None,
            notify_later: false,
        }
    }
}

impl ActivityConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                                              | Default                        |
    /// |-------------------------------------------------------|--------------------------------|
    /// | `ACTIVITY_ENABLED`                                    | `true`                         |
    /// | `ACTIVITY_EMAIL_ENABLED`                              | `false`                        |
    /// | `ACTIVITY_BATCH_EMAIL_ENABLED`                        | `false`                        |
    /// | `ACTIVITY_SUBSCRIPTION_ENABLED`                       | `false`                        |
    /// | `ACTIVITY_SUBSCRIBE_AS_DEFAULT`                       | `true`                         |
    /// | `ACTIVITY_SUBSCRIBE_TO_EMAIL_AS_DEFAULT`              | value of subscribe-as-default  |
    /// | `ACTIVITY_SUBSCRIBE_TO_OPTIONAL_TARGETS_AS_DEFAULT`   | value of subscribe-as-default  |
    /// | `ACTIVITY_GROUP_EXPIRY_DELAY_SECS`                    | unbounded                      |
    /// | `ACTIVITY_OPENED_INDEX_LIMIT`                         | `10`                           |
    /// | `ACTIVITY_MAILER_SENDER`                              | `notifications@tidings.local`  |
    /// | `ACTIVITY_MAILER_REPLY_TO`                            | none                           |
    /// | `ACTIVITY_NOTIFY_LATER`                               | `false`                        |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let subscribe_as_default = parse_bool(
            &lookup,
            "ACTIVITY_SUBSCRIBE_AS_DEFAULT",
            defaults.subscribe_as_default,
        )?;

        let group_expiry_delay = match lookup("ACTIVITY_GROUP_EXPIRY_DELAY_SECS") {
            Some(raw) => Some(Duration::from_secs(raw.trim().parse().map_err(|_| {
                CoreError::Validation(format!(
                    "ACTIVITY_GROUP_EXPIRY_DELAY_SECS must be a number of seconds, got '{raw}'"
                ))
            })?)),
            None => None,
        };

        let opened_index_limit = match lookup("ACTIVITY_OPENED_INDEX_LIMIT") {
            Some(raw) => raw.trim().parse::<i64>().ok().filter(|n| *n > 0).ok_or_else(|| {
                CoreError::Validation(format!(
                    "ACTIVITY_OPENED_INDEX_LIMIT must be a positive integer, got '{raw}'"
                ))
            })?,
            None => defaults.opened_index_limit,
        };

        Ok(Self {
            enabled: parse_bool(&lookup, "ACTIVITY_ENABLED", defaults.enabled)?,
            email_enabled: parse_bool(&lookup, "ACTIVITY_EMAIL_ENABLED", defaults.email_enabled)?,
            batch_email_enabled: parse_bool(
                &lookup,
                "ACTIVITY_BATCH_EMAIL_ENABLED",
                defaults.batch_email_enabled,
            )?,
            subscription_enabled: parse_bool(
                &lookup,
                "ACTIVITY_SUBSCRIPTION_ENABLED",
                defaults.subscription_enabled,
            )?,
            subscribe_as_default,
            subscribe_to_email_as_default: parse_bool(
                &lookup,
                "ACTIVITY_SUBSCRIBE_TO_EMAIL_AS_DEFAULT",
                subscribe_as_default,
            )?,
            subscribe_to_optional_targets_as_default: parse_bool(
                &lookup,
                "ACTIVITY_SUBSCRIBE_TO_OPTIONAL_TARGETS_AS_DEFAULT",
                subscribe_as_default,
            )?,
            group_expiry_delay,
            opened_index_limit,
            mailer_sender: lookup("ACTIVITY_MAILER_SENDER").unwrap_or(defaults.mailer_sender),
            mailer_reply_to: lookup("ACTIVITY_MAILER_REPLY_TO").filter(|s| !s.trim().is_empty()),
            notify_later: parse_bool(&lookup, "ACTIVITY_NOTIFY_LATER", defaults.notify_later)?,
        })
    }

    /// Effective `subscribing_to_email` default. Email cannot default to
    /// subscribed while the key itself defaults to unsubscribed.
    pub fn email_default(&self) -> bool {
        self.subscribe_as_default && self.subscribe_to_email_as_default
    }

    /// Effective optional target default, bounded the same way as email.
    pub fn optional_target_default(&self) -> bool {
        self.subscribe_as_default && self.subscribe_to_optional_targets_as_default
    }
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> Result<bool, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Validation(format!(
            "{name} must be a boolean, got '{raw}'"
        ))),
    }
}
