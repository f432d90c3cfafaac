//! Subscription store: per-(target, key) opt-in state and the read-side
//! policy the dispatcher consults.

use std::sync::Arc;

use chrono::Utc;
use tidings_core::config::ActivityConfig;
use tidings_core::entity::EntityRef;
use tidings_core::error::CoreError;
use tidings_core::key::validate_key;
use tidings_core::policy::Target;
use tidings_core::types::DbId;
use tidings_db::models::subscription::{CreateSubscription, Subscription};
use tidings_db::repositories::SubscriptionRepository;

use crate::error::ActivityError;

/// Default page size for subscription listings.
pub const DEFAULT_SUBSCRIPTION_PAGE: i64 = 50;

// ---------------------------------------------------------------------------
// Effective policy
// ---------------------------------------------------------------------------

/// Subscription state of one (target, key) as seen by delivery.
///
/// Built without creating a row: when none exists the configured defaults
/// apply. When the target does not use subscriptions everything is allowed.
#[derive(Debug, Clone)]
pub struct SubscriptionPolicy {
    allowed: bool,
    row: Option<Subscription>,
    notification_default: bool,
    email_default: bool,
    optional_target_default: bool,
}

impl SubscriptionPolicy {
    /// Policy for a target that does not consult subscriptions.
    pub fn unrestricted() -> Self {
        Self {
            allowed: false,
            row: None,
            notification_default: true,
            email_default: true,
            optional_target_default: true,
        }
    }

    fn new(row: Option<Subscription>, config: &ActivityConfig) -> Self {
        Self {
            allowed: true,
            row,
            notification_default: config.subscribe_as_default,
            email_default: config.email_default(),
            optional_target_default: config.optional_target_default(),
        }
    }

    pub fn subscribes_to_notification(&self) -> bool {
        if !self.allowed {
            return true;
        }
        self.row
            .as_ref()
            .map_or(self.notification_default, |s| s.subscribing)
    }

    pub fn subscribes_to_email(&self) -> bool {
        if !self.allowed {
            return true;
        }
        self.row
            .as_ref()
            .map_or(self.email_default, Subscription::subscribes_to_email)
    }

    pub fn subscribes_to_optional_target(&self, name: &str) -> bool {
        if !self.allowed {
            return true;
        }
        match &self.row {
            Some(s) => s.subscribes_to_optional_target(name, self.optional_target_default),
            None => self.optional_target_default,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SubscriptionService {
    repo: Arc<dyn SubscriptionRepository>,
    config: Arc<ActivityConfig>,
}

impl SubscriptionService {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, config: Arc<ActivityConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn find(
        &self,
        target: &EntityRef,
        key: &str,
    ) -> Result<Option<Subscription>, ActivityError> {
        Ok(self.repo.find(target, key).await?)
    }

    /// Like [`find`](Self::find), with a missing row reported as `NotFound`.
    pub async fn find_by_key(
        &self,
        target: &EntityRef,
        key: &str,
    ) -> Result<Subscription, ActivityError> {
        self.find(target, key).await?.ok_or_else(|| {
            CoreError::NotFound {
                entity: format!("Subscription to '{key}' for {}", target.entity_type),
                id: target.id,
            }
            .into()
        })
    }

    pub async fn find_by_id(&self, id: DbId) -> Result<Subscription, ActivityError> {
        self.repo.find_by_id(id).await?.ok_or_else(|| {
            CoreError::NotFound {
                entity: "Subscription".to_string(),
                id,
            }
            .into()
        })
    }

    /// Find a subscription owned by `target`; others are reported missing.
    pub async fn find_for_target(
        &self,
        target: &EntityRef,
        id: DbId,
    ) -> Result<Subscription, ActivityError> {
        let subscription = self.find_by_id(id).await?;
        if subscription.target() != *target {
            return Err(CoreError::NotFound {
                entity: "Subscription".to_string(),
                id,
            }
            .into());
        }
        Ok(subscription)
    }

    /// Return the row for (target, key), creating it from the configured
    /// defaults if needed.
    pub async fn find_or_create(
        &self,
        target: &EntityRef,
        key: &str,
    ) -> Result<Subscription, ActivityError> {
        target.validate()?;
        validate_key(key)?;
        let input = CreateSubscription::with_defaults(target.clone(), key, &self.config, Utc::now());
        input.validate()?;
        Ok(self.repo.find_or_create(&input).await?)
    }

    pub async fn list(
        &self,
        target: &EntityRef,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Subscription>, ActivityError> {
        let limit = limit.unwrap_or(DEFAULT_SUBSCRIPTION_PAGE).clamp(1, 500);
        let offset = offset.unwrap_or(0).max(0);
        Ok(self.repo.list_for_target(target, limit, offset).await?)
    }

    pub async fn subscribe(
        &self,
        mut subscription: Subscription,
        with_email: bool,
        with_optional_targets: bool,
    ) -> Result<Subscription, ActivityError> {
        subscription.subscribe(Utc::now(), with_email, with_optional_targets);
        self.save(subscription, "Subscribed").await
    }

    pub async fn unsubscribe(&self, mut subscription: Subscription) -> Result<Subscription, ActivityError> {
        subscription.unsubscribe(Utc::now());
        self.save(subscription, "Unsubscribed").await
    }

    pub async fn subscribe_to_email(
        &self,
        mut subscription: Subscription,
    ) -> Result<Subscription, ActivityError> {
        subscription.subscribe_to_email(Utc::now())?;
        self.save(subscription, "Subscribed to email").await
    }

    pub async fn unsubscribe_to_email(
        &self,
        mut subscription: Subscription,
    ) -> Result<Subscription, ActivityError> {
        subscription.unsubscribe_to_email(Utc::now());
        self.save(subscription, "Unsubscribed to email").await
    }

    pub async fn subscribe_to_optional_target(
        &self,
        mut subscription: Subscription,
        name: &str,
    ) -> Result<Subscription, ActivityError> {
        subscription.subscribe_to_optional_target(name, Utc::now())?;
        self.save(subscription, "Subscribed to optional target").await
    }

    pub async fn unsubscribe_to_optional_target(
        &self,
        mut subscription: Subscription,
        name: &str,
    ) -> Result<Subscription, ActivityError> {
        subscription.unsubscribe_to_optional_target(name, Utc::now())?;
        self.save(subscription, "Unsubscribed to optional target").await
    }

    /// Subscribe `target` to `key`, creating the row if needed.
    pub async fn subscribe_to_key(
        &self,
        target: &EntityRef,
        key: &str,
        with_email: bool,
        with_optional_targets: bool,
    ) -> Result<Subscription, ActivityError> {
        let subscription = self.find_or_create(target, key).await?;
        self.subscribe(subscription, with_email, with_optional_targets)
            .await
    }

    /// Unsubscribe `target` from `key`, creating the row if needed.
    pub async fn unsubscribe_from_key(
        &self,
        target: &EntityRef,
        key: &str,
    ) -> Result<Subscription, ActivityError> {
        let subscription = self.find_or_create(target, key).await?;
        self.unsubscribe(subscription).await
    }

    pub async fn destroy(&self, subscription: &Subscription) -> Result<(), ActivityError> {
        if !self.repo.destroy(subscription.id).await? {
            return Err(CoreError::NotFound {
                entity: "Subscription".to_string(),
                id: subscription.id,
            }
            .into());
        }
        tracing::info!(subscription_id = subscription.id, "Subscription destroyed");
        Ok(())
    }

    async fn save(&self, subscription: Subscription, action: &str) -> Result<Subscription, ActivityError> {
        subscription.validate()?;
        let saved = self.repo.update(&subscription).await?;
        tracing::info!(
            subscription_id = saved.id,
            recipient = %saved.target(),
            key = %saved.key,
            "{action}"
        );
        Ok(saved)
    }

    // -- read-side policy -------------------------------------------------

    /// Effective subscription state of `target` for `key`. Never creates a
    /// row.
    pub async fn policy_for(
        &self,
        target: &dyn Target,
        key: &str,
    ) -> Result<SubscriptionPolicy, ActivityError> {
        if !target.subscription_allowed(key, &self.config) {
            return Ok(SubscriptionPolicy::unrestricted());
        }
        let row = self.repo.find(target.entity(), key).await?;
        Ok(SubscriptionPolicy::new(row, &self.config))
    }

    pub async fn subscribes_to_notification(
        &self,
        target: &dyn Target,
        key: &str,
    ) -> Result<bool, ActivityError> {
        Ok(self.policy_for(target, key).await?.subscribes_to_notification())
    }

    pub async fn subscribes_to_email(
        &self,
        target: &dyn Target,
        key: &str,
    ) -> Result<bool, ActivityError> {
        Ok(self.policy_for(target, key).await?.subscribes_to_email())
    }

    pub async fn subscribes_to_optional_target(
        &self,
        target: &dyn Target,
        key: &str,
        name: &str,
    ) -> Result<bool, ActivityError> {
        Ok(self
            .policy_for(target, key)
            .await?
            .subscribes_to_optional_target(name))
    }
}
