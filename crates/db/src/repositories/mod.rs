//! Repository layer.
//!
//! Each repository is an object-safe trait with a PostgreSQL implementation
//! here and an in-memory implementation in [`crate::memory`]. Every method
//! returns `sqlx::Error` so both backends surface the same error type.

use async_trait::async_trait;
use tidings_core::entity::EntityRef;
use tidings_core::types::{DbId, Timestamp};

use crate::models::notification::{
    CreateNotification, GroupOwnerQuery, Notification, NotificationFilter,
};
use crate::models::subscription::{CreateSubscription, Subscription};
use crate::models::target::TargetProfile;

pub mod notification_repo;
pub mod subscription_repo;
pub mod target_repo;

pub use notification_repo::PgNotificationRepo;
pub use subscription_repo::PgSubscriptionRepo;
pub use target_repo::PgTargetDirectory;

/// Storage for notification rows.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert a notification, returning the stored row.
    async fn create(&self, input: &CreateNotification) -> Result<Notification, sqlx::Error>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<Notification>, sqlx::Error>;

    /// Most recent unopened group owner matching the query.
    async fn find_group_owner(
        &self,
        query: &GroupOwnerQuery,
    ) -> Result<Option<Notification>, sqlx::Error>;

    /// Bump `updated_at`. Returns `false` if the row does not exist.
    async fn touch(&self, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error>;

    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, sqlx::Error>;

    /// Count matching rows. Order, limit and offset are ignored.
    async fn count(&self, filter: &NotificationFilter) -> Result<i64, sqlx::Error>;

    /// Open a notification if it is still unopened, and optionally its
    /// unopened group members. Returns the number of rows opened.
    async fn open(&self, id: DbId, at: Timestamp, with_members: bool)
        -> Result<u64, sqlx::Error>;

    /// Open every unopened notification matching the filter.
    async fn open_all(
        &self,
        filter: &NotificationFilter,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error>;

    /// Distinct notifiers across a group owner and its members.
    async fn count_distinct_notifiers(&self, owner_id: DbId) -> Result<i64, sqlx::Error>;

    /// Delete a notification. When it owns a group, the earliest member is
    /// promoted to owner and the remaining members are re-pointed to it.
    async fn destroy(&self, id: DbId) -> Result<bool, sqlx::Error>;

    /// Defer delivery of a notification to the batch flush.
    async fn mark_batched(&self, id: DbId) -> Result<bool, sqlx::Error>;

    /// Stamp `delivered_at` on rows that have not been delivered yet.
    async fn mark_delivered(&self, ids: &[DbId], at: Timestamp) -> Result<u64, sqlx::Error>;

    /// Batched, undelivered rows: fewest failed sends first, then oldest.
    async fn list_pending_batch(&self, limit: i64) -> Result<Vec<Notification>, sqlx::Error>;

    /// Count one failed batch send against each undelivered row.
    async fn record_batch_failure(&self, ids: &[DbId]) -> Result<u64, sqlx::Error>;
}

/// Storage for subscription rows.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find(&self, target: &EntityRef, key: &str)
        -> Result<Option<Subscription>, sqlx::Error>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<Subscription>, sqlx::Error>;

    /// Insert the row unless one already exists for (target, key), then
    /// return whichever row is stored.
    async fn find_or_create(&self, input: &CreateSubscription)
        -> Result<Subscription, sqlx::Error>;

    /// Persist flags, timestamps and optional targets of an existing row.
    async fn update(&self, subscription: &Subscription) -> Result<Subscription, sqlx::Error>;

    async fn list_for_target(
        &self,
        target: &EntityRef,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error>;

    async fn destroy(&self, id: DbId) -> Result<bool, sqlx::Error>;
}

/// Lookup of addressable recipients.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    async fn find(&self, target: &EntityRef) -> Result<Option<TargetProfile>, sqlx::Error>;

    /// Insert or replace a profile.
    async fn upsert(&self, profile: &TargetProfile) -> Result<TargetProfile, sqlx::Error>;
}
