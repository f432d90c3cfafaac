//! Capability interfaces implemented per entity type.
//!
//! The service never inspects host entities directly. A target, a
//! notifiable and a notifier are anything that implements the matching
//! trait; default method bodies fall back to [`ActivityConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ActivityConfig;
use crate::entity::{printable_type, EntityRef};
use crate::key::default_key;

/// Recipient of notifications.
pub trait Target: Send + Sync {
    fn entity(&self) -> &EntityRef;

    /// Address used by the email channel. `None` disables email for this
    /// target regardless of policy.
    fn email(&self) -> Option<&str>;

    fn printable_name(&self) -> String {
        self.entity().to_string()
    }

    /// Target-side email policy for `key`.
    fn email_allowed(&self, _key: &str, config: &ActivityConfig) -> bool {
        config.email_enabled
    }

    /// Whether notifications merged into a group wait for the batch flush.
    fn batch_email_allowed(&self, _key: &str, config: &ActivityConfig) -> bool {
        config.email_enabled && config.batch_email_enabled
    }

    /// Whether subscription records are consulted for this target.
    fn subscription_allowed(&self, _key: &str, config: &ActivityConfig) -> bool {
        config.subscription_enabled
    }
}

/// One optional delivery channel configured for a notifiable type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalTargetSpec {
    /// Registry name of the channel (`slack`, `amazon_sns`, ...).
    pub name: String,
    /// Channel-specific options handed to `notify`.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Entity whose events produce notifications.
pub trait Notifiable: Send + Sync {
    fn entity(&self) -> &EntityRef;

    fn printable_name(&self) -> String {
        self.entity().to_string()
    }

    fn printable_type(&self) -> String {
        printable_type(&self.entity().entity_type)
    }

    fn default_notification_key(&self) -> String {
        default_key(&self.entity().entity_type)
    }

    /// Notifiable-side email policy for `target` and `key`.
    fn email_allowed(&self, _target: &EntityRef, _key: &str, config: &ActivityConfig) -> bool {
        config.email_enabled
    }

    /// Segments grouping per instance instead of per notifiable type.
    fn group_key_override(&self) -> Option<&str> {
        None
    }

    /// Link back to the notifiable in the host application.
    fn notifiable_path(&self) -> Option<&str> {
        None
    }

    /// Optional channels to publish to for `target_type` and `key`.
    fn optional_targets(&self, _target_type: &str, _key: &str) -> Vec<OptionalTargetSpec> {
        Vec::new()
    }

    /// Grouping lookback override for `target_type` and `key`.
    fn group_expiry_delay(&self, _target_type: &str, _key: &str) -> Option<Duration> {
        None
    }
}

/// Actor credited as the origin of a notification.
pub trait Notifier: Send + Sync {
    fn entity(&self) -> &EntityRef;

    fn printable_name(&self) -> String {
        self.entity().to_string()
    }
}
