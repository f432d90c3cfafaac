//! Notification entity model, DTOs and query filters.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tidings_core::entity::EntityRef;
use tidings_core::grouping::GroupScope;
use tidings_core::types::{DbId, SortOrder, Timestamp};

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: DbId,
    pub target_type: String,
    pub target_id: DbId,
    pub notifiable_type: String,
    pub notifiable_id: DbId,
    pub key: String,
    pub group_type: Option<String>,
    pub group_id: Option<DbId>,
    pub group_owner_id: Option<DbId>,
    pub group_key: Option<String>,
    pub notifier_type: Option<String>,
    pub notifier_id: Option<DbId>,
    pub parameters: serde_json::Value,
    pub opened_at: Option<Timestamp>,
    pub batched: bool,
    /// Failed batch email sends so far.
    pub batch_attempts: i32,
    pub delivered_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Notification {
    pub fn target(&self) -> EntityRef {
        EntityRef::new(&self.target_type, self.target_id)
    }

    pub fn notifiable(&self) -> EntityRef {
        EntityRef::new(&self.notifiable_type, self.notifiable_id)
    }

    pub fn group(&self) -> Option<EntityRef> {
        EntityRef::from_parts(self.group_type.as_deref(), self.group_id)
    }

    pub fn notifier(&self) -> Option<EntityRef> {
        EntityRef::from_parts(self.notifier_type.as_deref(), self.notifier_id)
    }

    pub fn is_opened(&self) -> bool {
        self.opened_at.is_some()
    }

    /// Owners (and ungrouped notifications) have no `group_owner_id`.
    pub fn is_group_owner(&self) -> bool {
        self.group_owner_id.is_none()
    }

    pub fn is_group_member(&self) -> bool {
        self.group_owner_id.is_some()
    }

    /// Id of the owner of this notification's group (itself for owners).
    pub fn group_owner_or_self(&self) -> DbId {
        self.group_owner_id.unwrap_or(self.id)
    }

    /// Whether this row shares `target`, `key` and `scope` with a new
    /// notification. Used by the in-memory grouping lookup.
    pub fn in_group_scope(&self, target: &EntityRef, key: &str, scope: &GroupScope) -> bool {
        self.target_type == target.entity_type
            && self.target_id == target.id
            && self.key == key
            && scope.matches(&self.notifiable_type, self.group_key.as_deref())
    }
}

/// DTO for inserting a notification.
#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub target: EntityRef,
    pub notifiable: EntityRef,
    pub key: String,
    pub group: Option<EntityRef>,
    pub group_owner_id: Option<DbId>,
    pub group_key: Option<String>,
    pub notifier: Option<EntityRef>,
    pub parameters: serde_json::Value,
    pub created_at: Timestamp,
}

/// Lookup for the open group a new notification may join.
#[derive(Debug, Clone)]
pub struct GroupOwnerQuery {
    pub target: EntityRef,
    pub key: String,
    pub scope: GroupScope,
    /// Explicit group reference; `None` matches only ungrouped-by-reference rows.
    pub group: Option<EntityRef>,
    /// Owners created at or before this instant are out of the window.
    pub created_after: Option<Timestamp>,
}

/// Opened-state filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenedFilter {
    #[default]
    All,
    Opened,
    Unopened,
}

/// Criteria for listing, counting and bulk-opening notifications.
///
/// Every field narrows the result set; the default matches everything.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub target: Option<EntityRef>,
    pub opened: OpenedFilter,
    pub key: Option<String>,
    pub notifiable_type: Option<String>,
    pub notifiable: Option<EntityRef>,
    pub group: Option<EntityRef>,
    /// Only members of the group owned by this notification.
    pub group_owner_id: Option<DbId>,
    /// Only group owners (including ungrouped notifications).
    pub owners_only: bool,
    /// Strictly after this instant.
    pub later_than: Option<Timestamp>,
    /// Strictly before this instant.
    pub earlier_than: Option<Timestamp>,
    pub order: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NotificationFilter {
    pub fn for_target(target: EntityRef) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    /// Members of the group owned by `owner_id`.
    pub fn members_of(owner_id: DbId) -> Self {
        Self {
            group_owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    pub fn opened(mut self, opened: OpenedFilter) -> Self {
        self.opened = opened;
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation of everything except order and paging.
    pub fn matches(&self, n: &Notification) -> bool {
        if let Some(t) = &self.target {
            if n.target_type != t.entity_type || n.target_id != t.id {
                return false;
            }
        }
        match self.opened {
            OpenedFilter::All => {}
            OpenedFilter::Opened if n.opened_at.is_none() => return false,
            OpenedFilter::Unopened if n.opened_at.is_some() => return false,
            _ => {}
        }
        if self.key.as_ref().is_some_and(|k| *k != n.key) {
            return false;
        }
        if self
            .notifiable_type
            .as_ref()
            .is_some_and(|t| *t != n.notifiable_type)
        {
            return false;
        }
        if let Some(nf) = &self.notifiable {
            if n.notifiable_type != nf.entity_type || n.notifiable_id != nf.id {
                return false;
            }
        }
        if let Some(g) = &self.group {
            if n.group().as_ref() != Some(g) {
                return false;
            }
        }
        if self.group_owner_id.is_some() && n.group_owner_id != self.group_owner_id {
            return false;
        }
        if self.owners_only && n.group_owner_id.is_some() {
            return false;
        }
        if self.later_than.is_some_and(|t| n.created_at <= t) {
            return false;
        }
        if self.earlier_than.is_some_and(|t| n.created_at >= t) {
            return false;
        }
        true
    }
}

/// Aggregate view of a notification's group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub group_owner_id: DbId,
    /// Members, excluding the owner.
    pub member_count: i64,
    /// Members plus the owner.
    pub notification_count: i64,
    /// Distinct notifiers across members and owner.
    pub notifier_count: i64,
    pub latest_member_id: Option<DbId>,
}
