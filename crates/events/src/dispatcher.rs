//! Delivery dispatcher: decides which channels a stored notification goes
//! to and runs them.
//!
//! [`Dispatcher::dispatch`] is called inline by `notify`, or from the
//! [`DeliveryWorker`] when delivery is deferred to the event bus. Every
//! channel runs isolated: a failure is logged and recorded in the
//! [`DeliveryReport`] but never turns into an error of the dispatch
//! itself. Only storage failures do.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tidings_core::channels::CHANNEL_EMAIL;
use tidings_core::config::ActivityConfig;
use tidings_core::policy::{Notifiable, Notifier, OptionalTargetSpec, Target};
use tidings_db::models::notification::Notification;
use tidings_db::repositories::NotificationRepository;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::{NotificationEvent, EVENT_NOTIFICATION_CREATED};
use crate::delivery::email::EmailDelivery;
use crate::delivery::{
    ChannelMessage, ChannelOutcome, ChannelResult, DeliveryReport, OptionalTargetRegistry,
};
use crate::error::ActivityError;
use crate::registry::{NotifiableRegistry, TargetRegistry};
use crate::subscriptions::{SubscriptionPolicy, SubscriptionService};

/// Build the channel payload for a stored notification.
pub fn channel_message(
    notification: &Notification,
    target: &dyn Target,
    notifiable: &dyn Notifiable,
    notifier: Option<&dyn Notifier>,
) -> ChannelMessage {
    ChannelMessage {
        notification_id: notification.id,
        key: notification.key.clone(),
        target: notification.target(),
        target_name: target.printable_name(),
        notifiable: notification.notifiable(),
        notifiable_name: notifiable.printable_name(),
        notifiable_type: notifiable.printable_type(),
        notifiable_path: notifiable.notifiable_path().map(str::to_string),
        notifier_name: notifier.map(|n| n.printable_name()),
        group_owner_id: notification.group_owner_id,
        parameters: notification.parameters.clone(),
        created_at: notification.created_at,
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    config: Arc<ActivityConfig>,
    notifications: Arc<dyn NotificationRepository>,
    subscriptions: SubscriptionService,
    email: Option<Arc<EmailDelivery>>,
    optional_targets: OptionalTargetRegistry,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ActivityConfig>,
        notifications: Arc<dyn NotificationRepository>,
        subscriptions: SubscriptionService,
        optional_targets: OptionalTargetRegistry,
    ) -> Self {
        Self {
            config,
            notifications,
            subscriptions,
            email: None,
            optional_targets,
        }
    }

    /// Enable the email channel.
    pub fn with_email(mut self, email: Arc<EmailDelivery>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn email(&self) -> Option<&Arc<EmailDelivery>> {
        self.email.as_ref()
    }

    /// Deliver `notification` to `target` over every allowed channel.
    ///
    /// A notification that joined an existing group while batch email is
    /// allowed for the target is marked `batched` and its email is left to
    /// the batch flush, which also stamps `delivered_at`; optional targets
    /// still run right away. Otherwise `delivered_at` is stamped once all
    /// channels have reported, whatever their outcome.
    pub async fn dispatch(
        &self,
        target: &dyn Target,
        notifiable: &dyn Notifiable,
        notifier: Option<&dyn Notifier>,
        notification: &Notification,
        send_email: bool,
    ) -> Result<DeliveryReport, ActivityError> {
        let key = notification.key.as_str();
        let mut report = DeliveryReport::new(notification.id);
        let specs = notifiable.optional_targets(&target.entity().entity_type, key);
        let policy = self.subscriptions.policy_for(target, key).await?;

        if !policy.subscribes_to_notification() {
            report.record(CHANNEL_EMAIL, skipped("unsubscribed"));
            for spec in &specs {
                report.record(spec.name.clone(), skipped("unsubscribed"));
            }
            self.finish(notification, &report).await?;
            return Ok(report);
        }

        let message = channel_message(notification, target, notifiable, notifier);
        let optional = join_all(
            specs
                .iter()
                .map(|spec| self.optional_target_outcome(&policy, spec, &message)),
        );

        if notification.is_group_member() && target.batch_email_allowed(key, &self.config) {
            self.notifications.mark_batched(notification.id).await?;
            report.batched = true;
            report.record(CHANNEL_EMAIL, skipped("batched"));
            report.channels.extend(optional.await);
            tracing::info!(
                notification_id = notification.id,
                group_owner_id = ?notification.group_owner_id,
                delivered = report.delivered_count(),
                "Notification email deferred to batch"
            );
            return Ok(report);
        }

        let email = self.email_outcome(target, notifiable, &policy, &message, send_email);
        let (email, optional) = futures::join!(email, optional);

        report.record(CHANNEL_EMAIL, email);
        report.channels.extend(optional);
        self.finish(notification, &report).await?;
        Ok(report)
    }

    async fn finish(
        &self,
        notification: &Notification,
        report: &DeliveryReport,
    ) -> Result<(), ActivityError> {
        self.notifications
            .mark_delivered(&[notification.id], Utc::now())
            .await?;
        tracing::info!(
            notification_id = notification.id,
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "Notification dispatched"
        );
        Ok(())
    }

    async fn email_outcome(
        &self,
        target: &dyn Target,
        notifiable: &dyn Notifiable,
        policy: &SubscriptionPolicy,
        message: &ChannelMessage,
        send_email: bool,
    ) -> ChannelOutcome {
        let key = message.key.as_str();
        if !send_email {
            return skipped("not requested");
        }
        if !target.email_allowed(key, &self.config) {
            return skipped("disabled for target");
        }
        if !notifiable.email_allowed(target.entity(), key, &self.config) {
            return skipped("disabled for notifiable");
        }
        let Some(address) = target.email() else {
            return skipped("no email address");
        };
        if !policy.subscribes_to_email() {
            return skipped("unsubscribed");
        }
        let Some(mailer) = &self.email else {
            return skipped("mailer not configured");
        };

        match mailer.deliver(address, message).await {
            Ok(()) => ChannelOutcome::Delivered,
            Err(e) => {
                tracing::warn!(
                    notification_id = message.notification_id,
                    channel = CHANNEL_EMAIL,
                    error = %e,
                    "Delivery channel failed"
                );
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }

    async fn optional_target_outcome(
        &self,
        policy: &SubscriptionPolicy,
        spec: &OptionalTargetSpec,
        message: &ChannelMessage,
    ) -> ChannelResult {
        let outcome = if !policy.subscribes_to_optional_target(&spec.name) {
            skipped("unsubscribed")
        } else {
            match self.optional_targets.get(&spec.name) {
                None => skipped("not registered"),
                Some(channel) => match channel.notify(message, &spec.options).await {
                    Ok(()) => ChannelOutcome::Delivered,
                    Err(e) => {
                        tracing::warn!(
                            notification_id = message.notification_id,
                            channel = %spec.name,
                            error = %e,
                            "Delivery channel failed"
                        );
                        ChannelOutcome::Failed(e.to_string())
                    }
                },
            }
        };
        ChannelResult {
            channel: spec.name.clone(),
            outcome,
        }
    }
}

fn skipped(reason: &str) -> ChannelOutcome {
    ChannelOutcome::Skipped(reason.to_string())
}

// ---------------------------------------------------------------------------
// DeliveryWorker
// ---------------------------------------------------------------------------

/// Background consumer of `notification.created` events.
///
/// Delivery is at-least-once from the caller's point of view: a crash
/// between storing a notification and handling its event leaves
/// `delivered_at` unset.
pub struct DeliveryWorker {
    dispatcher: Arc<Dispatcher>,
    notifications: Arc<dyn NotificationRepository>,
    targets: TargetRegistry,
    notifiables: Arc<NotifiableRegistry>,
}

impl DeliveryWorker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        notifications: Arc<dyn NotificationRepository>,
        targets: TargetRegistry,
        notifiables: Arc<NotifiableRegistry>,
    ) -> Self {
        Self {
            dispatcher,
            notifications,
            targets,
            notifiables,
        }
    }

    /// Run until `cancel` fires or the bus is dropped.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<NotificationEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Delivery worker cancelled");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.handle(&event).await {
                            tracing::error!(
                                error = %e,
                                notification_id = event.notification_id,
                                "Failed to deliver notification"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            skipped = n,
                            "Delivery worker lagged, some notifications were not delivered"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, delivery worker shutting down");
                        break;
                    }
                },
            }
        }
    }

    /// Dispatch the notification referenced by one event. Returns `None`
    /// for foreign event types and for notifications that no longer exist.
    pub async fn handle(
        &self,
        event: &NotificationEvent,
    ) -> Result<Option<DeliveryReport>, ActivityError> {
        if event.event_type != EVENT_NOTIFICATION_CREATED {
            return Ok(None);
        }
        let Some(notification) = self.notifications.find_by_id(event.notification_id).await?
        else {
            tracing::warn!(
                notification_id = event.notification_id,
                "Notification vanished before delivery"
            );
            return Ok(None);
        };

        let target = self.targets.resolve(&event.target).await?;
        let notifiable = self.notifiables.resolve(event.notifiable.clone());
        let notifier = event.notifier.as_ref().map(|n| n as &dyn Notifier);

        let report = self
            .dispatcher
            .dispatch(&target, &notifiable, notifier, &notification, event.send_email)
            .await?;
        Ok(Some(report))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use tidings_core::descriptor::{
        ConfiguredNotifiable, NotifiableDescriptor, NotifiableTypeConfig, NotifierDescriptor,
    };
    use tidings_core::entity::EntityRef;
    use tidings_core::types::DbId;
    use tidings_db::models::notification::CreateNotification;
    use tidings_db::models::target::TargetProfile;
    use tidings_db::Storage;

    use super::*;
    use crate::bus::EventBus;
    use crate::delivery::email::tests::RecordingTransport;
    use crate::delivery::template::TemplateRegistry;
    use crate::delivery::tests::CountingTarget;

    pub(crate) fn email_config() -> ActivityConfig {
        ActivityConfig {
            email_enabled: true,
            subscription_enabled: true,
            ..ActivityConfig::default()
        }
    }

    pub(crate) fn mailer(transport: Arc<RecordingTransport>, config: &ActivityConfig) -> Arc<EmailDelivery> {
        Arc::new(EmailDelivery::new(
            transport,
            Arc::new(TemplateRegistry::new()),
            config,
        ))
    }

    struct Fixture {
        storage: Storage,
        config: Arc<ActivityConfig>,
        transport: Arc<RecordingTransport>,
        dispatcher: Dispatcher,
    }

    fn fixture(config: ActivityConfig, channels: OptionalTargetRegistry) -> Fixture {
        fixture_with(config, channels, RecordingTransport::default())
    }

    fn fixture_with(
        config: ActivityConfig,
        channels: OptionalTargetRegistry,
        transport: RecordingTransport,
    ) -> Fixture {
        let storage = Storage::in_memory();
        let config = Arc::new(config);
        let transport = Arc::new(transport);
        let dispatcher = Dispatcher::new(
            config.clone(),
            storage.notifications.clone(),
            SubscriptionService::new(storage.subscriptions.clone(), config.clone()),
            channels,
        )
        .with_email(mailer(transport.clone(), &config));
        Fixture {
            storage,
            config,
            transport,
            dispatcher,
        }
    }

    fn ada() -> TargetProfile {
        TargetProfile {
            display_name: Some("Ada".into()),
            ..TargetProfile::new(EntityRef::new("User", 1)).with_email("ada@example.com")
        }
    }

    fn comment(channels: &[&str]) -> ConfiguredNotifiable {
        ConfiguredNotifiable::new(
            NotifiableDescriptor::new(EntityRef::new("Comment", 2)),
            Arc::new(NotifiableTypeConfig {
                optional_targets: channels
                    .iter()
                    .map(|name| OptionalTargetSpec {
                        name: name.to_string(),
                        options: serde_json::json!({}),
                    })
                    .collect(),
                ..NotifiableTypeConfig::default()
            }),
        )
    }

    async fn stored(storage: &Storage, owner: Option<DbId>) -> Notification {
        storage
            .notifications
            .create(&CreateNotification {
                target: EntityRef::new("User", 1),
                notifiable: EntityRef::new("Comment", 2),
                key: "comment.create".into(),
                group: None,
                group_owner_id: owner,
                group_key: None,
                notifier: Some(EntityRef::new("User", 7)),
                parameters: serde_json::json!({}),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delivers_email_and_stamps_delivered_at() {
        let fx = fixture(email_config(), OptionalTargetRegistry::new());
        let n = stored(&fx.storage, None).await;
        let notifier = NotifierDescriptor {
            entity: EntityRef::new("User", 7),
            printable_name: Some("Grace".into()),
        };

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&[]), Some(&notifier), &n, true)
            .await
            .unwrap();

        assert_eq!(report.outcome(CHANNEL_EMAIL), Some(&ChannelOutcome::Delivered));
        let raw = fx.transport.raw().await;
        assert_eq!(raw.len(), 1);
        assert!(raw[0].contains("Subject: Notification of comment"));
        let reloaded = fx.storage.notifications.find_by_id(n.id).await.unwrap().unwrap();
        assert!(reloaded.delivered_at.is_some());
    }

    #[tokio::test]
    async fn unsubscribed_key_suppresses_every_channel() {
        let slack = CountingTarget::new("slack", false);
        let fx = fixture(email_config(), OptionalTargetRegistry::new().with(slack.clone()));
        SubscriptionService::new(fx.storage.subscriptions.clone(), fx.config.clone())
            .unsubscribe_from_key(&EntityRef::new("User", 1), "comment.create")
            .await
            .unwrap();
        let n = stored(&fx.storage, None).await;

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&["slack"]), None, &n, true)
            .await
            .unwrap();

        assert_eq!(
            report.outcome(CHANNEL_EMAIL),
            Some(&ChannelOutcome::Skipped("unsubscribed".into()))
        );
        assert!(fx.transport.raw().await.is_empty());
        assert_eq!(slack.calls(), 0);
    }

    #[tokio::test]
    async fn email_unsubscription_keeps_optional_targets() {
        let slack = CountingTarget::new("slack", false);
        let fx = fixture(email_config(), OptionalTargetRegistry::new().with(slack.clone()));
        let subs = SubscriptionService::new(fx.storage.subscriptions.clone(), fx.config.clone());
        let sub = subs
            .find_or_create(&EntityRef::new("User", 1), "comment.create")
            .await
            .unwrap();
        subs.unsubscribe_to_email(sub).await.unwrap();
        let n = stored(&fx.storage, None).await;

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&["slack"]), None, &n, true)
            .await
            .unwrap();

        assert!(fx.transport.raw().await.is_empty());
        assert_eq!(report.outcome("slack"), Some(&ChannelOutcome::Delivered));
        assert_eq!(slack.calls(), 1);
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_the_others() {
        let slack = CountingTarget::new("slack", true);
        let webhook = CountingTarget::new("webhook", false);
        let fx = fixture(
            email_config(),
            OptionalTargetRegistry::new()
                .with(slack.clone())
                .with(webhook.clone()),
        );
        let n = stored(&fx.storage, None).await;

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&["slack", "webhook"]), None, &n, true)
            .await
            .unwrap();

        assert_eq!(report.outcome(CHANNEL_EMAIL), Some(&ChannelOutcome::Delivered));
        assert!(matches!(report.outcome("slack"), Some(ChannelOutcome::Failed(_))));
        assert_eq!(report.outcome("webhook"), Some(&ChannelOutcome::Delivered));
        assert_eq!(report.failed_count(), 1);
        assert_eq!(webhook.calls(), 1);
    }

    #[tokio::test]
    async fn failing_mailer_is_recorded_not_raised() {
        let fx = fixture_with(
            email_config(),
            OptionalTargetRegistry::new(),
            RecordingTransport::failing(),
        );
        let n = stored(&fx.storage, None).await;
        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&[]), None, &n, true)
            .await
            .unwrap();
        assert!(matches!(report.outcome(CHANNEL_EMAIL), Some(ChannelOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn email_gating_reasons() {
        let fx = fixture(email_config(), OptionalTargetRegistry::new());
        let n = stored(&fx.storage, None).await;

        let no_address = TargetProfile::new(EntityRef::new("User", 1));
        let report = fx
            .dispatcher
            .dispatch(&no_address, &comment(&[]), None, &n, true)
            .await
            .unwrap();
        assert_eq!(
            report.outcome(CHANNEL_EMAIL),
            Some(&ChannelOutcome::Skipped("no email address".into()))
        );

        let opted_out = TargetProfile {
            email_allowed: Some(false),
            ..ada()
        };
        let report = fx
            .dispatcher
            .dispatch(&opted_out, &comment(&[]), None, &n, true)
            .await
            .unwrap();
        assert_eq!(
            report.outcome(CHANNEL_EMAIL),
            Some(&ChannelOutcome::Skipped("disabled for target".into()))
        );

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&[]), None, &n, false)
            .await
            .unwrap();
        assert_eq!(
            report.outcome(CHANNEL_EMAIL),
            Some(&ChannelOutcome::Skipped("not requested".into()))
        );
        assert!(fx.transport.raw().await.is_empty());
    }

    #[tokio::test]
    async fn unregistered_channel_is_skipped() {
        let fx = fixture(email_config(), OptionalTargetRegistry::new());
        let n = stored(&fx.storage, None).await;
        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&["amazon_sns"]), None, &n, true)
            .await
            .unwrap();
        assert_eq!(
            report.outcome("amazon_sns"),
            Some(&ChannelOutcome::Skipped("not registered".into()))
        );
    }

    #[tokio::test]
    async fn merged_notification_is_batched_under_batch_mode() {
        let slack = CountingTarget::new("slack", false);
        let fx = fixture(
            ActivityConfig {
                batch_email_enabled: true,
                ..email_config()
            },
            OptionalTargetRegistry::new().with(slack.clone()),
        );
        let owner = stored(&fx.storage, None).await;
        let member = stored(&fx.storage, Some(owner.id)).await;

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&["slack"]), None, &owner, true)
            .await
            .unwrap();
        assert!(!report.batched);

        let report = fx
            .dispatcher
            .dispatch(&ada(), &comment(&["slack"]), None, &member, true)
            .await
            .unwrap();
        assert!(report.batched);
        assert_eq!(
            report.outcome(CHANNEL_EMAIL),
            Some(&ChannelOutcome::Skipped("batched".into()))
        );
        assert_eq!(report.outcome("slack"), Some(&ChannelOutcome::Delivered));
        assert_eq!(slack.calls(), 2);
        assert_eq!(fx.transport.raw().await.len(), 1);
        let reloaded = fx.storage.notifications.find_by_id(member.id).await.unwrap().unwrap();
        assert!(reloaded.delivered_at.is_none());

        let pending = fx.storage.notifications.list_pending_batch(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, member.id);
    }

    #[tokio::test]
    async fn worker_delivers_published_events_until_bus_closes() {
        let fx = fixture(email_config(), OptionalTargetRegistry::new());
        let targets = TargetRegistry::new(fx.storage.targets.clone());
        targets.register(&ada()).await.unwrap();
        let n = stored(&fx.storage, None).await;

        let bus = EventBus::default();
        let receiver = bus.subscribe();
        let worker = DeliveryWorker::new(
            Arc::new(fx.dispatcher),
            fx.storage.notifications.clone(),
            targets,
            Arc::new(NotifiableRegistry::new()),
        );
        let handle = tokio::spawn(worker.run(receiver, CancellationToken::new()));

        bus.publish(NotificationEvent::created(
            &n,
            NotifiableDescriptor::new(EntityRef::new("Comment", 2)),
            None,
            true,
        ));
        drop(bus);
        handle.await.unwrap();

        assert_eq!(fx.transport.raw().await.len(), 1);
        let reloaded = fx.storage.notifications.find_by_id(n.id).await.unwrap().unwrap();
        assert!(reloaded.delivered_at.is_some());
    }

    #[tokio::test]
    async fn worker_stops_on_cancel() {
        let fx = fixture(email_config(), OptionalTargetRegistry::new());
        let bus = EventBus::default();
        let worker = DeliveryWorker::new(
            Arc::new(fx.dispatcher),
            fx.storage.notifications.clone(),
            TargetRegistry::new(fx.storage.targets.clone()),
            Arc::new(NotifiableRegistry::new()),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(bus.subscribe(), cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
