//! Wiring of the notification services over one [`Storage`].

use std::sync::Arc;

use tidings_core::config::ActivityConfig;
use tidings_db::Storage;

use crate::batch::BatchScheduler;
use crate::bus::EventBus;
use crate::delivery::email::EmailDelivery;
use crate::delivery::OptionalTargetRegistry;
use crate::dispatcher::{DeliveryWorker, Dispatcher};
use crate::grouping::GroupingEngine;
use crate::notifications::NotificationService;
use crate::notifier::ActivityNotifier;
use crate::registry::{NotifiableRegistry, TargetRegistry};
use crate::subscriptions::SubscriptionService;

/// Every service, sharing one configuration, storage backend and bus.
#[derive(Clone)]
pub struct ActivityServices {
    pub config: Arc<ActivityConfig>,
    pub storage: Storage,
    pub bus: Arc<EventBus>,
    pub targets: TargetRegistry,
    pub notifiables: Arc<NotifiableRegistry>,
    pub notifications: NotificationService,
    pub subscriptions: SubscriptionService,
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: ActivityNotifier,
}

impl ActivityServices {
    pub fn new(
        config: Arc<ActivityConfig>,
        storage: Storage,
        notifiables: NotifiableRegistry,
        optional_targets: OptionalTargetRegistry,
        email: Option<Arc<EmailDelivery>>,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let targets = TargetRegistry::new(storage.targets.clone());
        let notifiables = Arc::new(notifiables);
        let notifications = NotificationService::new(storage.notifications.clone(), config.clone());
        let subscriptions = SubscriptionService::new(storage.subscriptions.clone(), config.clone());

        let mut dispatcher = Dispatcher::new(
            config.clone(),
            storage.notifications.clone(),
            subscriptions.clone(),
            optional_targets,
        );
        if let Some(email) = email {
            dispatcher = dispatcher.with_email(email);
        }
        let dispatcher = Arc::new(dispatcher);

        let notifier = ActivityNotifier::new(
            config.clone(),
            targets.clone(),
            notifiables.clone(),
            GroupingEngine::new(storage.notifications.clone(), config.clone()),
            notifications.clone(),
            subscriptions.clone(),
            dispatcher.clone(),
            Some(bus.clone()),
        );

        Self {
            config,
            storage,
            bus,
            targets,
            notifiables,
            notifications,
            subscriptions,
            dispatcher,
            notifier,
        }
    }

    /// Consumer for deferred deliveries. Subscribe it to [`Self::bus`].
    pub fn delivery_worker(&self) -> DeliveryWorker {
        DeliveryWorker::new(
            self.dispatcher.clone(),
            self.storage.notifications.clone(),
            self.targets.clone(),
            self.notifiables.clone(),
        )
    }

    pub fn batch_scheduler(&self) -> BatchScheduler {
        BatchScheduler::new(
            self.storage.notifications.clone(),
            self.targets.clone(),
            self.notifiables.clone(),
            self.subscriptions.clone(),
            self.dispatcher.email().cloned(),
        )
    }
}
