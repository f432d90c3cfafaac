//! Data-driven implementations of the capability traits.
//!
//! A standalone service learns about notifiables and notifiers from the
//! request that triggers `notify`. [`NotifiableDescriptor`] carries the
//! per-instance attributes; [`NotifiableTypeConfig`] carries the per-type
//! policy loaded at startup. [`ConfiguredNotifiable`] combines both.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ActivityConfig;
use crate::entity::{printable_type, EntityRef};
use crate::policy::{Notifiable, Notifier, OptionalTargetSpec};

/// Per-instance notifiable attributes supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifiableDescriptor {
    #[serde(flatten)]
    pub entity: EntityRef,
    #[serde(default)]
    pub printable_name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Per-instance grouping segment (overrides per-type grouping).
    #[serde(default)]
    pub group_key: Option<String>,
    /// Per-instance email policy; falls back to the type config.
    #[serde(default)]
    pub email_allowed: Option<bool>,
}

impl NotifiableDescriptor {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            printable_name: None,
            path: None,
            group_key: None,
            email_allowed: None,
        }
    }
}

/// Per-type notifiable policy, usually loaded from a JSON file keyed by
/// type name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifiableTypeConfig {
    #[serde(default)]
    pub email_allowed: Option<bool>,
    #[serde(default)]
    pub optional_targets: Vec<OptionalTargetSpec>,
    #[serde(default)]
    pub group_expiry_delay_secs: Option<u64>,
    #[serde(default)]
    pub printable_type: Option<String>,
}

/// A notifiable built from a descriptor and its type policy.
#[derive(Debug, Clone)]
pub struct ConfiguredNotifiable {
    descriptor: NotifiableDescriptor,
    type_config: Arc<NotifiableTypeConfig>,
}

impl ConfiguredNotifiable {
    pub fn new(descriptor: NotifiableDescriptor, type_config: Arc<NotifiableTypeConfig>) -> Self {
        Self {
            descriptor,
            type_config,
        }
    }

    pub fn descriptor(&self) -> &NotifiableDescriptor {
        &self.descriptor
    }
}

impl Notifiable for ConfiguredNotifiable {
    fn entity(&self) -> &EntityRef {
        &self.descriptor.entity
    }

    fn printable_name(&self) -> String {
        self.descriptor
            .printable_name
            .clone()
            .unwrap_or_else(|| self.descriptor.entity.to_string())
    }

    fn printable_type(&self) -> String {
        self.type_config
            .printable_type
            .clone()
            .unwrap_or_else(|| printable_type(&self.descriptor.entity.entity_type))
    }

    fn email_allowed(&self, _target: &EntityRef, _key: &str, config: &ActivityConfig) -> bool {
        self.descriptor
            .email_allowed
            .or(self.type_config.email_allowed)
            .unwrap_or(config.email_enabled)
    }

    fn group_key_override(&self) -> Option<&str> {
        self.descriptor.group_key.as_deref()
    }

    fn notifiable_path(&self) -> Option<&str> {
        self.descriptor.path.as_deref()
    }

    fn optional_targets(&self, _target_type: &str, _key: &str) -> Vec<OptionalTargetSpec> {
        self.type_config.optional_targets.clone()
    }

    fn group_expiry_delay(&self, _target_type: &str, _key: &str) -> Option<Duration> {
        self.type_config
            .group_expiry_delay_secs
            .map(Duration::from_secs)
    }
}

/// Notifier reference supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierDescriptor {
    #[serde(flatten)]
    pub entity: EntityRef,
    #[serde(default)]
    pub printable_name: Option<String>,
}

impl Notifier for NotifierDescriptor {
    fn entity(&self) -> &EntityRef {
        &self.entity
    }

    fn printable_name(&self) -> String {
        self.printable_name
            .clone()
            .unwrap_or_else(|| self.entity.to_string())
    }
}
