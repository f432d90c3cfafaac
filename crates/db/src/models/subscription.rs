//! Subscription entity model and its state transitions.
//!
//! A subscription is keyed by (target, notification key). The transition
//! methods mutate the in-memory row; callers persist it with
//! [`SubscriptionRepository::update`](crate::repositories::SubscriptionRepository::update).
//! Transitions that would break an invariant return
//! [`CoreError::Validation`] and leave the row untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tidings_core::channels::validate_optional_target_name;
use tidings_core::config::ActivityConfig;
use tidings_core::entity::EntityRef;
use tidings_core::error::CoreError;
use tidings_core::types::{DbId, Timestamp};

/// Subscription state of one optional delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalTargetSubscription {
    pub subscribing: bool,
    #[serde(default)]
    pub subscribed_at: Option<Timestamp>,
    #[serde(default)]
    pub unsubscribed_at: Option<Timestamp>,
}

impl OptionalTargetSubscription {
    pub fn subscribed(at: Timestamp) -> Self {
        Self {
            subscribing: true,
            subscribed_at: Some(at),
            unsubscribed_at: None,
        }
    }

    pub fn unsubscribed(at: Timestamp) -> Self {
        Self {
            subscribing: false,
            subscribed_at: None,
            unsubscribed_at: Some(at),
        }
    }
}

/// Channel name -> channel subscription state.
pub type OptionalTargets = BTreeMap<String, OptionalTargetSubscription>;

/// A row from the `subscriptions` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Subscription {
    pub id: DbId,
    pub target_type: String,
    pub target_id: DbId,
    pub key: String,
    pub subscribing: bool,
    pub subscribing_to_email: bool,
    pub subscribed_at: Option<Timestamp>,
    pub unsubscribed_at: Option<Timestamp>,
    pub subscribed_to_email_at: Option<Timestamp>,
    pub unsubscribed_to_email_at: Option<Timestamp>,
    #[sqlx(json)]
    pub optional_targets: OptionalTargets,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    pub fn target(&self) -> EntityRef {
        EntityRef::new(&self.target_type, self.target_id)
    }

    /// Subscribe to the key, optionally to email and every known optional
    /// target as well.
    pub fn subscribe(&mut self, now: Timestamp, with_email: bool, with_optional_targets: bool) {
        self.subscribing = true;
        self.subscribed_at = Some(now);
        self.unsubscribed_at = None;
        if with_email {
            self.mark_email(true, now);
        }
        if with_optional_targets {
            for state in self.optional_targets.values_mut() {
                *state = OptionalTargetSubscription::subscribed(now);
            }
        }
        self.updated_at = now;
    }

    /// Unsubscribe from the key. Email and every optional target are
    /// unsubscribed with it.
    pub fn unsubscribe(&mut self, now: Timestamp) {
        self.subscribing = false;
        self.subscribed_at = None;
        self.unsubscribed_at = Some(now);
        self.mark_email(false, now);
        for state in self.optional_targets.values_mut() {
            if state.subscribing {
                *state = OptionalTargetSubscription::unsubscribed(now);
            }
        }
        self.updated_at = now;
    }

    pub fn subscribe_to_email(&mut self, now: Timestamp) -> Result<(), CoreError> {
        if !self.subscribing {
            return Err(CoreError::Validation(format!(
                "Cannot subscribe to email for '{}' while unsubscribed from it",
                self.key
            )));
        }
        self.mark_email(true, now);
        self.updated_at = now;
        Ok(())
    }

    pub fn unsubscribe_to_email(&mut self, now: Timestamp) {
        self.mark_email(false, now);
        self.updated_at = now;
    }

    // Exactly one of the two email timestamps is set, matching the flag.
    fn mark_email(&mut self, subscribing: bool, now: Timestamp) {
        self.subscribing_to_email = subscribing;
        if subscribing {
            self.subscribed_to_email_at = Some(now);
            self.unsubscribed_to_email_at = None;
        } else {
            self.subscribed_to_email_at = None;
            self.unsubscribed_to_email_at = Some(now);
        }
    }

    pub fn subscribe_to_optional_target(
        &mut self,
        name: &str,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        validate_optional_target_name(name)?;
        if !self.subscribing {
            return Err(CoreError::Validation(format!(
                "Cannot subscribe to optional target '{name}' for '{}' while unsubscribed from it",
                self.key
            )));
        }
        self.optional_targets
            .insert(name.to_string(), OptionalTargetSubscription::subscribed(now));
        self.updated_at = now;
        Ok(())
    }

    pub fn unsubscribe_to_optional_target(
        &mut self,
        name: &str,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        validate_optional_target_name(name)?;
        self.optional_targets.insert(
            name.to_string(),
            OptionalTargetSubscription::unsubscribed(now),
        );
        self.updated_at = now;
        Ok(())
    }

    /// Effective email subscription.
    pub fn subscribes_to_email(&self) -> bool {
        self.subscribing && self.subscribing_to_email
    }

    /// Effective optional target subscription; channels without an entry
    /// use `default`.
    pub fn subscribes_to_optional_target(&self, name: &str, default: bool) -> bool {
        self.subscribing
            && self
                .optional_targets
                .get(name)
                .map(|s| s.subscribing)
                .unwrap_or(default)
    }

    /// Check the flag invariants.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_flags(
            &self.key,
            self.subscribing,
            self.subscribing_to_email,
            &self.optional_targets,
        )
    }
}

/// DTO for inserting a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub target: EntityRef,
    pub key: String,
    pub subscribing: bool,
    pub subscribing_to_email: bool,
    pub optional_targets: OptionalTargets,
    pub created_at: Timestamp,
}

impl CreateSubscription {
    /// Row built from the configured defaults.
    pub fn with_defaults(
        target: EntityRef,
        key: impl Into<String>,
        config: &ActivityConfig,
        now: Timestamp,
    ) -> Self {
        Self {
            target,
            key: key.into(),
            subscribing: config.subscribe_as_default,
            subscribing_to_email: config.email_default(),
            optional_targets: OptionalTargets::new(),
            created_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_flags(
            &self.key,
            self.subscribing,
            self.subscribing_to_email,
            &self.optional_targets,
        )
    }

    pub fn subscribed_at(&self) -> Option<Timestamp> {
        self.subscribing.then_some(self.created_at)
    }

    pub fn unsubscribed_at(&self) -> Option<Timestamp> {
        (!self.subscribing).then_some(self.created_at)
    }

    pub fn subscribed_to_email_at(&self) -> Option<Timestamp> {
        self.subscribing_to_email.then_some(self.created_at)
    }

    pub fn unsubscribed_to_email_at(&self) -> Option<Timestamp> {
        (!self.subscribing_to_email).then_some(self.created_at)
    }

    /// Materialize the row with the given id (in-memory storage).
    pub fn into_subscription(self, id: DbId) -> Subscription {
        Subscription {
            id,
            subscribed_at: self.subscribed_at(),
            unsubscribed_at: self.unsubscribed_at(),
            subscribed_to_email_at: self.subscribed_to_email_at(),
            unsubscribed_to_email_at: self.unsubscribed_to_email_at(),
            target_type: self.target.entity_type,
            target_id: self.target.id,
            key: self.key,
            subscribing: self.subscribing,
            subscribing_to_email: self.subscribing_to_email,
            optional_targets: self.optional_targets,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

fn validate_flags(
    key: &str,
    subscribing: bool,
    subscribing_to_email: bool,
    optional_targets: &OptionalTargets,
) -> Result<(), CoreError> {
    if subscribing {
        return Ok(());
    }
    if subscribing_to_email {
        return Err(CoreError::Validation(format!(
            "Subscription to '{key}' cannot include email while unsubscribed"
        )));
    }
    if let Some((name, _)) = optional_targets.iter().find(|(_, s)| s.subscribing) {
        return Err(CoreError::Validation(format!(
            "Subscription to '{key}' cannot include optional target '{name}' while unsubscribed"
        )));
    }
    Ok(())
}
