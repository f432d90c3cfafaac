//! `notify`: turn one event on a notifiable into stored notifications for
//! each target and hand them to delivery.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tidings_core::config::ActivityConfig;
use tidings_core::descriptor::{NotifiableDescriptor, NotifierDescriptor};
use tidings_core::entity::EntityRef;
use tidings_core::key::validate_key;
use tidings_core::policy::{Notifiable, Notifier};
use tidings_db::models::notification::{CreateNotification, Notification};

use crate::bus::{EventBus, NotificationEvent};
use crate::delivery::DeliveryReport;
use crate::dispatcher::Dispatcher;
use crate::error::ActivityError;
use crate::grouping::GroupingEngine;
use crate::notifications::NotificationService;
use crate::registry::{NotifiableRegistry, TargetRegistry};
use crate::subscriptions::SubscriptionService;

fn default_true() -> bool {
    true
}

fn empty_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Input of [`ActivityNotifier::notify`].
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    pub targets: Vec<EntityRef>,
    pub notifiable: NotifiableDescriptor,
    /// Defaults to `<notifiable resource name>.default`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub group: Option<EntityRef>,
    #[serde(default)]
    pub notifier: Option<NotifierDescriptor>,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
    #[serde(default = "default_true")]
    pub send_email: bool,
    /// Overrides `ActivityConfig::notify_later` for this call.
    #[serde(default)]
    pub notify_later: Option<bool>,
}

impl NotifyRequest {
    pub fn new(targets: Vec<EntityRef>, notifiable: NotifiableDescriptor) -> Self {
        Self {
            targets,
            notifiable,
            key: None,
            group: None,
            notifier: None,
            parameters: empty_parameters(),
            send_email: true,
            notify_later: None,
        }
    }
}

/// What `notify` did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifyOutcome {
    pub notifications: Vec<Notification>,
    /// Inline delivery results; empty when delivery was deferred.
    pub reports: Vec<DeliveryReport>,
    /// Targets that unsubscribed from the key.
    pub skipped_targets: Vec<EntityRef>,
}

#[derive(Clone)]
pub struct ActivityNotifier {
    config: Arc<ActivityConfig>,
    targets: TargetRegistry,
    notifiables: Arc<NotifiableRegistry>,
    grouping: GroupingEngine,
    notifications: NotificationService,
    subscriptions: SubscriptionService,
    dispatcher: Arc<Dispatcher>,
    bus: Option<Arc<EventBus>>,
}

impl ActivityNotifier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ActivityConfig>,
        targets: TargetRegistry,
        notifiables: Arc<NotifiableRegistry>,
        grouping: GroupingEngine,
        notifications: NotificationService,
        subscriptions: SubscriptionService,
        dispatcher: Arc<Dispatcher>,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            config,
            targets,
            notifiables,
            grouping,
            notifications,
            subscriptions,
            dispatcher,
            bus,
        }
    }

    pub async fn notify(&self, request: NotifyRequest) -> Result<NotifyOutcome, ActivityError> {
        if !self.config.enabled {
            tracing::debug!("Notifications disabled, notify skipped");
            return Ok(NotifyOutcome::default());
        }

        request.notifiable.entity.validate()?;
        let notifiable = self.notifiables.resolve(request.notifiable.clone());
        let key = request
            .key
            .clone()
            .unwrap_or_else(|| notifiable.default_notification_key());
        validate_key(&key)?;
        let later = request.notify_later.unwrap_or(self.config.notify_later);

        // Every target must resolve before anything is stored or sent.
        let mut targets = Vec::with_capacity(request.targets.len());
        for target_ref in &request.targets {
            targets.push((target_ref, self.targets.resolve(target_ref).await?));
        }

        let mut outcome = NotifyOutcome::default();
        for (target_ref, target) in targets {
            if !self
                .subscriptions
                .subscribes_to_notification(&target, &key)
                .await?
            {
                tracing::debug!(recipient = %target_ref, key = %key, "Target unsubscribed, skipped");
                outcome.skipped_targets.push(target_ref.clone());
                continue;
            }

            let now = Utc::now();
            let placement = self
                .grouping
                .resolve(target_ref, &notifiable, &key, request.group.as_ref(), now)
                .await?;
            let notification = self
                .notifications
                .create(CreateNotification {
                    target: target_ref.clone(),
                    notifiable: request.notifiable.entity.clone(),
                    key: key.clone(),
                    group: placement.group.clone(),
                    group_owner_id: placement.group_owner_id,
                    group_key: placement.group_key.clone(),
                    notifier: request.notifier.as_ref().map(|n| n.entity.clone()),
                    parameters: request.parameters.clone(),
                    created_at: now,
                })
                .await?;
            self.grouping.touch_owner(&placement).await?;

            if later && self.publish(&notification, &request) {
                outcome.notifications.push(notification);
                continue;
            }

            let report = self
                .dispatcher
                .dispatch(
                    &target,
                    &notifiable,
                    request.notifier.as_ref().map(|n| n as &dyn Notifier),
                    &notification,
                    request.send_email,
                )
                .await?;
            outcome.reports.push(report);
            outcome.notifications.push(notification);
        }

        tracing::info!(
            key = %key,
            notifiable = %notifiable.entity(),
            created = outcome.notifications.len(),
            skipped = outcome.skipped_targets.len(),
            "Notify completed"
        );
        Ok(outcome)
    }

    /// Hand a notification to the delivery worker. Returns `false` when no
    /// worker is listening, in which case the caller delivers inline.
    fn publish(&self, notification: &Notification, request: &NotifyRequest) -> bool {
        let Some(bus) = &self.bus else {
            return false;
        };
        let published = bus.publish(NotificationEvent::created(
            notification,
            request.notifiable.clone(),
            request.notifier.clone(),
            request.send_email,
        ));
        if !published {
            tracing::warn!(
                notification_id = notification.id,
                "No delivery worker listening, delivering inline"
            );
        }
        published
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tidings_core::channels::CHANNEL_EMAIL;
    use tidings_core::error::CoreError;
    use tidings_db::models::target::TargetProfile;
    use tidings_db::Storage;

    use super::*;
    use crate::delivery::email::tests::RecordingTransport;
    use crate::delivery::{ChannelOutcome, OptionalTargetRegistry};
    use crate::dispatcher::tests::{email_config, mailer};

    struct Fixture {
        storage: Storage,
        transport: Arc<RecordingTransport>,
        bus: Arc<EventBus>,
        notifier: ActivityNotifier,
        subscriptions: SubscriptionService,
    }

    async fn fixture(config: ActivityConfig) -> Fixture {
        let storage = Storage::in_memory();
        let config = Arc::new(config);
        let transport = Arc::new(RecordingTransport::default());
        let targets = TargetRegistry::new(storage.targets.clone());
        for id in 1..=2 {
            targets
                .register(
                    &TargetProfile::new(EntityRef::new("User", id))
                        .with_email(format!("user{id}@example.com")),
                )
                .await
                .unwrap();
        }
        let subscriptions = SubscriptionService::new(storage.subscriptions.clone(), config.clone());
        let dispatcher = Dispatcher::new(
            config.clone(),
            storage.notifications.clone(),
            subscriptions.clone(),
            OptionalTargetRegistry::new(),
        )
        .with_email(mailer(transport.clone(), &config));
        let bus = Arc::new(EventBus::default());
        let notifier = ActivityNotifier::new(
            config.clone(),
            targets,
            Arc::new(NotifiableRegistry::new()),
            GroupingEngine::new(storage.notifications.clone(), config.clone()),
            NotificationService::new(storage.notifications.clone(), config.clone()),
            subscriptions.clone(),
            Arc::new(dispatcher),
            Some(bus.clone()),
        );
        Fixture {
            storage,
            transport,
            bus,
            notifier,
            subscriptions,
        }
    }

    fn request(targets: &[i64], comment: i64) -> NotifyRequest {
        NotifyRequest {
            key: Some("comment.create".into()),
            ..NotifyRequest::new(
                targets.iter().map(|id| EntityRef::new("User", *id)).collect(),
                NotifiableDescriptor::new(EntityRef::new("Comment", comment)),
            )
        }
    }

    #[tokio::test]
    async fn notifies_every_target_and_sends_email() {
        let fx = fixture(email_config()).await;
        let outcome = fx.notifier.notify(request(&[1, 2], 10)).await.unwrap();

        assert_eq!(outcome.notifications.len(), 2);
        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome
            .reports
            .iter()
            .all(|r| r.outcome(CHANNEL_EMAIL) == Some(&ChannelOutcome::Delivered)));
        assert_eq!(fx.transport.raw().await.len(), 2);
    }

    #[tokio::test]
    async fn second_notification_joins_first_group() {
        let fx = fixture(email_config()).await;
        let first = fx.notifier.notify(request(&[1], 10)).await.unwrap();
        let second = fx.notifier.notify(request(&[1], 11)).await.unwrap();

        let owner = &first.notifications[0];
        let member = &second.notifications[0];
        assert!(owner.group_owner_id.is_none());
        assert_eq!(member.group_owner_id, Some(owner.id));

        let reloaded = fx.storage.notifications.find_by_id(owner.id).await.unwrap().unwrap();
        assert!(reloaded.updated_at >= owner.updated_at);
    }

    #[tokio::test]
    async fn unsubscribed_target_is_skipped() {
        let fx = fixture(email_config()).await;
        fx.subscriptions
            .unsubscribe_from_key(&EntityRef::new("User", 2), "comment.create")
            .await
            .unwrap();

        let outcome = fx.notifier.notify(request(&[1, 2], 10)).await.unwrap();
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(outcome.skipped_targets, vec![EntityRef::new("User", 2)]);
        assert_eq!(fx.transport.raw().await.len(), 1);
    }

    #[tokio::test]
    async fn disabled_config_stores_nothing() {
        let fx = fixture(ActivityConfig {
            enabled: false,
            ..email_config()
        })
        .await;
        let outcome = fx.notifier.notify(request(&[1], 10)).await.unwrap();
        assert!(outcome.notifications.is_empty());
        assert!(fx.storage.notifications.find_by_id(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let fx = fixture(email_config()).await;
        assert_matches!(
            fx.notifier.notify(request(&[99], 10)).await,
            Err(ActivityError::Core(CoreError::NotFound { id: 99, .. }))
        );
    }

    #[tokio::test]
    async fn unknown_target_among_known_ones_stores_nothing() {
        let fx = fixture(email_config()).await;
        assert_matches!(
            fx.notifier.notify(request(&[1, 99], 10)).await,
            Err(ActivityError::Core(CoreError::NotFound { id: 99, .. }))
        );
        assert!(fx.storage.notifications.find_by_id(1).await.unwrap().is_none());
        assert!(fx.transport.raw().await.is_empty());
    }

    #[tokio::test]
    async fn key_defaults_to_notifiable_resource_name() {
        let fx = fixture(email_config()).await;
        let req = NotifyRequest::new(
            vec![EntityRef::new("User", 1)],
            NotifiableDescriptor::new(EntityRef::new("BlogPost", 3)),
        );
        let outcome = fx.notifier.notify(req).await.unwrap();
        assert_eq!(outcome.notifications[0].key, "blog_post.default");
    }

    #[tokio::test]
    async fn notify_later_publishes_instead_of_delivering() {
        let fx = fixture(email_config()).await;
        let mut rx = fx.bus.subscribe();
        let outcome = fx
            .notifier
            .notify(NotifyRequest {
                notify_later: Some(true),
                ..request(&[1], 10)
            })
            .await
            .unwrap();

        assert!(outcome.reports.is_empty());
        assert!(fx.transport.raw().await.is_empty());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.notification_id, outcome.notifications[0].id);
        assert!(!event.merged);
    }

    #[tokio::test]
    async fn notify_later_without_worker_delivers_inline() {
        let fx = fixture(email_config()).await;
        let outcome = fx
            .notifier
            .notify(NotifyRequest {
                notify_later: Some(true),
                ..request(&[1], 10)
            })
            .await
            .unwrap();
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(fx.transport.raw().await.len(), 1);
    }
}
