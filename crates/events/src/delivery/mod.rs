//! Delivery channels for stored notifications.
//!
//! Email is the default channel ([`email`]). Everything else is an
//! [`OptionalTarget`] looked up by name in an [`OptionalTargetRegistry`]:
//! Slack ([`slack`]), Amazon SNS ([`sns`]) and generic webhooks
//! ([`webhook`]). Each channel reports its own [`ChannelOutcome`]; one
//! failing channel never affects another.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tidings_core::entity::EntityRef;
use tidings_core::types::{DbId, Timestamp};

pub mod email;
pub mod slack;
pub mod sns;
pub mod template;
pub mod webhook;

use email::EmailError;
use slack::SlackError;
use sns::SnsError;
use webhook::WebhookError;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure of a single delivery channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Slack(#[from] SlackError),

    #[error(transparent)]
    Sns(#[from] SnsError),
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Everything a channel needs to render one notification.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMessage {
    pub notification_id: DbId,
    pub key: String,
    pub target: EntityRef,
    pub target_name: String,
    pub notifiable: EntityRef,
    pub notifiable_name: String,
    /// Human readable notifiable type, e.g. `"Blog post"`.
    pub notifiable_type: String,
    pub notifiable_path: Option<String>,
    pub notifier_name: Option<String>,
    pub group_owner_id: Option<DbId>,
    pub parameters: serde_json::Value,
    pub created_at: Timestamp,
}

impl ChannelMessage {
    /// One-line plain text summary used by chat and push channels.
    pub fn text(&self) -> String {
        match &self.notifier_name {
            Some(notifier) => format!(
                "{notifier} notified {} of {} ({})",
                self.target_name, self.notifiable_name, self.key
            ),
            None => format!(
                "{} has a new notification: {} ({})",
                self.target_name, self.notifiable_name, self.key
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of one channel for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelResult {
    pub channel: String,
    pub outcome: ChannelOutcome,
}

/// Per-channel results of dispatching one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub notification_id: DbId,
    /// Email deferred to the batch flush.
    pub batched: bool,
    pub channels: Vec<ChannelResult>,
}

impl DeliveryReport {
    pub fn new(notification_id: DbId) -> Self {
        Self {
            notification_id,
            batched: false,
            channels: Vec::new(),
        }
    }

    pub fn record(&mut self, channel: impl Into<String>, outcome: ChannelOutcome) {
        self.channels.push(ChannelResult {
            channel: channel.into(),
            outcome,
        });
    }

    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| &c.outcome)
    }

    pub fn delivered_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.outcome == ChannelOutcome::Delivered)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Failed(_)))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Optional targets
// ---------------------------------------------------------------------------

/// A named delivery channel besides email.
#[async_trait]
pub trait OptionalTarget: Send + Sync {
    /// Registry name, e.g. `"slack"`.
    fn name(&self) -> &str;

    /// Deliver `message`. `options` come from the notifiable type's
    /// configuration for this channel and may override defaults.
    async fn notify(
        &self,
        message: &ChannelMessage,
        options: &serde_json::Value,
    ) -> Result<(), ChannelError>;
}

/// Optional targets by name.
#[derive(Clone, Default)]
pub struct OptionalTargetRegistry {
    targets: HashMap<String, Arc<dyn OptionalTarget>>,
}

impl OptionalTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own name, replacing any previous one.
    pub fn register(&mut self, target: Arc<dyn OptionalTarget>) {
        self.targets.insert(target.name().to_string(), target);
    }

    pub fn with(mut self, target: Arc<dyn OptionalTarget>) -> Self {
        self.register(target);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OptionalTarget>> {
        self.targets.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// String option lookup shared by the channel implementations.
pub(crate) fn option_str<'a>(options: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    options.get(name).and_then(serde_json::Value::as_str)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
