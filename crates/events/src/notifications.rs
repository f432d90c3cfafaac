//! Notification store: create, query, open and destroy notifications.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tidings_core::config::ActivityConfig;
use tidings_core::entity::EntityRef;
use tidings_core::error::CoreError;
use tidings_core::key::validate_key;
use tidings_core::types::{DbId, SortOrder, Timestamp};
use tidings_db::models::notification::{
    CreateNotification, GroupSummary, Notification, NotificationFilter, OpenedFilter,
};
use tidings_db::repositories::NotificationRepository;

use crate::error::ActivityError;

/// Options for a target's notification index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexOptions {
    /// Oldest first within each half.
    #[serde(default)]
    pub reverse: bool,
    /// Cap on unopened notifications; unbounded by default.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Include group members instead of owners only.
    #[serde(default)]
    pub with_group_members: bool,
}

#[derive(Clone)]
pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    config: Arc<ActivityConfig>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>, config: Arc<ActivityConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn create(&self, input: CreateNotification) -> Result<Notification, ActivityError> {
        input.target.validate()?;
        input.notifiable.validate()?;
        validate_key(&input.key)?;
        if let Some(group) = &input.group {
            group.validate()?;
        }
        if let Some(notifier) = &input.notifier {
            notifier.validate()?;
        }
        let notification = self.repo.create(&input).await?;
        tracing::info!(
            notification_id = notification.id,
            recipient = %input.target,
            key = %notification.key,
            group_owner_id = ?notification.group_owner_id,
            "Notification created"
        );
        Ok(notification)
    }

    pub async fn find(&self, id: DbId) -> Result<Notification, ActivityError> {
        self.repo.find_by_id(id).await?.ok_or_else(|| {
            CoreError::NotFound {
                entity: "Notification".to_string(),
                id,
            }
            .into()
        })
    }

    /// Find a notification that belongs to `target`. Notifications of other
    /// targets are reported as missing.
    pub async fn find_for_target(
        &self,
        target: &EntityRef,
        id: DbId,
    ) -> Result<Notification, ActivityError> {
        let notification = self.find(id).await?;
        if notification.target() != *target {
            return Err(CoreError::NotFound {
                entity: "Notification".to_string(),
                id,
            }
            .into());
        }
        Ok(notification)
    }

    pub async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, ActivityError> {
        Ok(self.repo.list(filter).await?)
    }

    pub async fn count(&self, filter: &NotificationFilter) -> Result<i64, ActivityError> {
        Ok(self.repo.count(filter).await?)
    }

    /// Open a notification. The first open wins: an already-opened
    /// notification keeps its `opened_at` and the call returns 0.
    pub async fn open(
        &self,
        notification: &Notification,
        opened_at: Option<Timestamp>,
        with_members: bool,
    ) -> Result<u64, ActivityError> {
        let at = opened_at.unwrap_or_else(Utc::now);
        let opened = self.repo.open(notification.id, at, with_members).await?;
        tracing::info!(notification_id = notification.id, opened, "Notification opened");
        Ok(opened)
    }

    /// Open every unopened notification of `target` matching `filter`.
    pub async fn open_all_of(
        &self,
        target: &EntityRef,
        filter: NotificationFilter,
        opened_at: Option<Timestamp>,
    ) -> Result<u64, ActivityError> {
        let filter = NotificationFilter {
            target: Some(target.clone()),
            opened: OpenedFilter::Unopened,
            ..filter
        };
        let opened = self
            .repo
            .open_all(&filter, opened_at.unwrap_or_else(Utc::now))
            .await?;
        tracing::info!(recipient = %target, opened, "Opened all notifications");
        Ok(opened)
    }

    pub async fn unopened_count(&self, target: &EntityRef) -> Result<i64, ActivityError> {
        let filter = NotificationFilter {
            owners_only: true,
            ..NotificationFilter::for_target(target.clone()).opened(OpenedFilter::Unopened)
        };
        self.count(&filter).await
    }

    /// Most recently opened notifications, bounded by `opened_index_limit`.
    pub async fn recently_opened(&self, target: &EntityRef) -> Result<Vec<Notification>, ActivityError> {
        let filter = NotificationFilter::for_target(target.clone())
            .opened(OpenedFilter::Opened)
            .limit(self.config.opened_index_limit);
        self.list(&filter).await
    }

    /// Unopened notifications followed by recently opened ones.
    pub async fn index(
        &self,
        target: &EntityRef,
        options: &IndexOptions,
    ) -> Result<Vec<Notification>, ActivityError> {
        let order = if options.reverse {
            SortOrder::Earliest
        } else {
            SortOrder::Latest
        };
        let owners_only = !options.with_group_members;

        let unopened = NotificationFilter {
            owners_only,
            limit: options.limit,
            ..NotificationFilter::for_target(target.clone())
                .opened(OpenedFilter::Unopened)
                .order(order)
        };
        let opened = NotificationFilter {
            owners_only,
            ..NotificationFilter::for_target(target.clone())
                .opened(OpenedFilter::Opened)
                .order(order)
                .limit(self.config.opened_index_limit)
        };

        let mut notifications = self.list(&unopened).await?;
        notifications.extend(self.list(&opened).await?);
        Ok(notifications)
    }

    /// Aggregate view of the group `notification` belongs to.
    pub async fn group_summary(
        &self,
        notification: &Notification,
    ) -> Result<GroupSummary, ActivityError> {
        let owner_id = notification.group_owner_or_self();
        let members = NotificationFilter::members_of(owner_id);
        let member_count = self.repo.count(&members).await?;
        let latest_member_id = self
            .repo
            .list(&members.clone().order(SortOrder::Latest).limit(1))
            .await?
            .first()
            .map(|n| n.id);
        let notifier_count = self.repo.count_distinct_notifiers(owner_id).await?;

        Ok(GroupSummary {
            group_owner_id: owner_id,
            member_count,
            notification_count: member_count + 1,
            notifier_count,
            latest_member_id,
        })
    }

    /// Delete a notification. A destroyed group owner hands its group to
    /// the earliest member.
    pub async fn destroy(&self, notification: &Notification) -> Result<(), ActivityError> {
        if !self.repo.destroy(notification.id).await? {
            return Err(CoreError::NotFound {
                entity: "Notification".to_string(),
                id: notification.id,
            }
            .into());
        }
        tracing::info!(notification_id = notification.id, "Notification destroyed");
        Ok(())
    }
}
