//! Batch email scheduler.
//!
//! Notifications merged into a group while batch email is allowed are
//! stored with `batched = true` and get no single email from the
//! dispatcher. [`BatchScheduler`] periodically collects them, sends one
//! email per (target, key) and stamps `delivered_at`. Rows whose email
//! fails stay pending, sorted behind fresh rows, and are closed after
//! [`MAX_BATCH_ATTEMPTS`] failures. Rows of unknown targets are closed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tidings_core::descriptor::{NotifiableDescriptor, NotifierDescriptor};
use tidings_core::error::CoreError;
use tidings_core::policy::{Notifier, Target};
use tidings_core::types::DbId;
use tidings_db::models::notification::Notification;
use tidings_db::models::target::TargetProfile;
use tidings_db::repositories::NotificationRepository;
use tokio_util::sync::CancellationToken;

use crate::delivery::email::{BatchMail, EmailDelivery};
use crate::dispatcher::channel_message;
use crate::error::ActivityError;
use crate::registry::{NotifiableRegistry, TargetRegistry};
use crate::subscriptions::SubscriptionService;

/// How often the scheduler flushes pending batches.
const BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

/// Maximum pending rows picked up by one flush.
const BATCH_FLUSH_LIMIT: i64 = 1000;

/// Failed sends after which pending rows are closed without email.
pub const MAX_BATCH_ATTEMPTS: i32 = 5;

pub struct BatchScheduler {
    notifications: Arc<dyn NotificationRepository>,
    targets: TargetRegistry,
    notifiables: Arc<NotifiableRegistry>,
    subscriptions: SubscriptionService,
    email: Option<Arc<EmailDelivery>>,
    interval: Duration,
    limit: i64,
}

impl BatchScheduler {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        targets: TargetRegistry,
        notifiables: Arc<NotifiableRegistry>,
        subscriptions: SubscriptionService,
        email: Option<Arc<EmailDelivery>>,
    ) -> Self {
        Self {
            notifications,
            targets,
            notifiables,
            subscriptions,
            email,
            interval: BATCH_FLUSH_INTERVAL,
            limit: BATCH_FLUSH_LIMIT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Run the flush loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Batch scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.flush().await {
                        tracing::error!(error = %e, "Failed to flush batch notifications");
                    }
                }
            }
        }
    }

    /// Send every pending batch. Returns the number of emails sent.
    pub async fn flush(&self) -> Result<usize, ActivityError> {
        let Some(mailer) = &self.email else {
            tracing::debug!("Mailer not configured, batch flush skipped");
            return Ok(0);
        };

        let pending = self.notifications.list_pending_batch(self.limit).await?;
        let mut batches: BTreeMap<(String, DbId, String), Vec<Notification>> = BTreeMap::new();
        for notification in pending {
            batches
                .entry((
                    notification.target_type.clone(),
                    notification.target_id,
                    notification.key.clone(),
                ))
                .or_default()
                .push(notification);
        }

        let mut sent = 0;
        for ((target_type, target_id, key), rows) in batches {
            match self.send_batch(mailer, &key, &rows).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        target_type = %target_type,
                        target_id,
                        key = %key,
                        error = %e,
                        "Failed to send batch email"
                    );
                }
            }
        }

        if sent > 0 {
            tracing::info!(count = sent, "Processed batch emails");
        }
        Ok(sent)
    }

    /// Send one batch. Returns `false` when nothing was sent: the target
    /// is unknown or no longer takes email (rows closed), or the send
    /// failed (rows stay pending until [`MAX_BATCH_ATTEMPTS`]).
    async fn send_batch(
        &self,
        mailer: &EmailDelivery,
        key: &str,
        rows: &[Notification],
    ) -> Result<bool, ActivityError> {
        let Some(first) = rows.first() else {
            return Ok(false);
        };
        let ids: Vec<DbId> = rows.iter().map(|n| n.id).collect();
        let target = match self.targets.resolve(&first.target()).await {
            Ok(target) => target,
            Err(ActivityError::Core(CoreError::NotFound { .. })) => {
                self.notifications.mark_delivered(&ids, Utc::now()).await?;
                tracing::warn!(
                    recipient = %first.target(),
                    key,
                    count = ids.len(),
                    "Batch target not found, rows closed"
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let address = self.recipient_address(&target, key).await?;
        let Some(address) = address else {
            self.notifications.mark_delivered(&ids, Utc::now()).await?;
            tracing::info!(
                recipient = %target.entity,
                key,
                count = ids.len(),
                "Batch closed without email"
            );
            return Ok(false);
        };

        let notifications = rows
            .iter()
            .map(|row| {
                let notifiable = self
                    .notifiables
                    .resolve(NotifiableDescriptor::new(row.notifiable()));
                let notifier = row.notifier().map(|entity| NotifierDescriptor {
                    entity,
                    printable_name: None,
                });
                channel_message(
                    row,
                    &target,
                    &notifiable,
                    notifier.as_ref().map(|n| n as &dyn Notifier),
                )
            })
            .collect::<Vec<_>>();

        let batch = BatchMail {
            target_type: target.entity.entity_type.clone(),
            target_name: target.printable_name(),
            key: key.to_string(),
            count: notifications.len(),
            notifications,
        };
        if let Err(e) = mailer.deliver_batch(&address, &batch).await {
            tracing::warn!(
                recipient = %target.entity,
                key,
                error = %e,
                "Batch email failed"
            );
            self.record_failure(rows).await?;
            return Ok(false);
        }

        self.notifications.mark_delivered(&ids, Utc::now()).await?;
        Ok(true)
    }

    async fn record_failure(&self, rows: &[Notification]) -> Result<(), ActivityError> {
        let ids: Vec<DbId> = rows.iter().map(|n| n.id).collect();
        self.notifications.record_batch_failure(&ids).await?;

        let exhausted: Vec<DbId> = rows
            .iter()
            .filter(|n| n.batch_attempts + 1 >= MAX_BATCH_ATTEMPTS)
            .map(|n| n.id)
            .collect();
        if !exhausted.is_empty() {
            self.notifications
                .mark_delivered(&exhausted, Utc::now())
                .await?;
            tracing::warn!(
                count = exhausted.len(),
                attempts = MAX_BATCH_ATTEMPTS,
                "Batch rows abandoned after repeated failures"
            );
        }
        Ok(())
    }

    async fn recipient_address(
        &self,
        target: &TargetProfile,
        key: &str,
    ) -> Result<Option<String>, ActivityError> {
        let Some(address) = target.email() else {
            return Ok(None);
        };
        if !self.subscriptions.subscribes_to_email(target, key).await? {
            return Ok(None);
        }
        Ok(Some(address.to_string()))
    }
}
