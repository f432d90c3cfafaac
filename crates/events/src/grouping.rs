//! Grouping engine: decide whether a new notification joins an open group.
//!
//! The lookup runs before the insert and the two are not linearized. Two
//! concurrent `notify` calls for the same scope may both miss each other
//! and start separate groups; the next notification then joins the newer
//! one.

use std::sync::Arc;

use chrono::Utc;
use tidings_core::config::ActivityConfig;
use tidings_core::entity::EntityRef;
use tidings_core::grouping::{expiry_cutoff, GroupScope};
use tidings_core::policy::Notifiable;
use tidings_core::types::{DbId, Timestamp};
use tidings_db::models::notification::GroupOwnerQuery;
use tidings_db::repositories::NotificationRepository;

/// Where a new notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlacement {
    /// Owner to join; `None` starts a new group.
    pub group_owner_id: Option<DbId>,
    pub group: Option<EntityRef>,
    pub group_key: Option<String>,
}

impl GroupPlacement {
    pub fn is_merged(&self) -> bool {
        self.group_owner_id.is_some()
    }
}

#[derive(Clone)]
pub struct GroupingEngine {
    notifications: Arc<dyn NotificationRepository>,
    config: Arc<ActivityConfig>,
}

impl GroupingEngine {
    pub fn new(notifications: Arc<dyn NotificationRepository>, config: Arc<ActivityConfig>) -> Self {
        Self {
            notifications,
            config,
        }
    }

    /// Lookback for `notifiable`: its own setting, else the configured one.
    pub fn expiry_delay(
        &self,
        target: &EntityRef,
        notifiable: &dyn Notifiable,
        key: &str,
    ) -> Option<std::time::Duration> {
        notifiable
            .group_expiry_delay(&target.entity_type, key)
            .or(self.config.group_expiry_delay)
    }

    /// Find the open group a notification for `target`/`key` should join.
    pub async fn resolve(
        &self,
        target: &EntityRef,
        notifiable: &dyn Notifiable,
        key: &str,
        explicit_group: Option<&EntityRef>,
        now: Timestamp,
    ) -> Result<GroupPlacement, sqlx::Error> {
        let group_key = notifiable.group_key_override().map(str::to_string);
        let query = GroupOwnerQuery {
            target: target.clone(),
            key: key.to_string(),
            scope: GroupScope::of(notifiable),
            group: explicit_group.cloned(),
            created_after: expiry_cutoff(now, self.expiry_delay(target, notifiable, key)),
        };

        let placement = match self.notifications.find_group_owner(&query).await? {
            Some(owner) => GroupPlacement {
                group_owner_id: Some(owner.id),
                group: owner.group(),
                group_key,
            },
            None => GroupPlacement {
                group_owner_id: None,
                group: explicit_group.cloned(),
                group_key,
            },
        };

        tracing::debug!(
            recipient = %target,
            key,
            group_owner_id = ?placement.group_owner_id,
            "Resolved group placement"
        );
        Ok(placement)
    }

    /// Bump the owner's `updated_at` after a member joined.
    pub async fn touch_owner(&self, placement: &GroupPlacement) -> Result<(), sqlx::Error> {
        if let Some(owner_id) = placement.group_owner_id {
            self.notifications.touch(owner_id, Utc::now()).await?;
        }
        Ok(())
    }
}
