//! Process-local repository implementations.
//!
//! Rows live in `tokio::sync::RwLock`-guarded maps with sequential ids. The
//! semantics mirror the PostgreSQL repositories, including first-open-wins,
//! owner promotion on destroy and find-or-create on the subscription key.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tidings_core::entity::EntityRef;
use tidings_core::grouping::recency_cmp;
use tidings_core::types::{DbId, SortOrder, Timestamp};
use tokio::sync::RwLock;

use crate::models::notification::{
    CreateNotification, GroupOwnerQuery, Notification, NotificationFilter,
};
use crate::models::subscription::{CreateSubscription, Subscription};
use crate::models::target::TargetProfile;
use crate::repositories::{NotificationRepository, SubscriptionRepository, TargetDirectory};

/// Rows keyed by id, plus the next id to hand out.
struct Table<T> {
    rows: BTreeMap<DbId, T>,
    next_id: DbId,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T> Table<T> {
    fn allocate(&mut self) -> DbId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryNotificationRepo {
    table: RwLock<Table<Notification>>,
}

impl InMemoryNotificationRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_rows(rows: &mut [Notification], order: SortOrder) {
    rows.sort_by(|a, b| {
        let latest_first = recency_cmp((a.created_at, a.id), (b.created_at, b.id));
        match order {
            SortOrder::Latest => latest_first,
            SortOrder::Earliest => latest_first.reverse(),
        }
    });
}

fn page<T>(rows: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Vec<T> {
    let offset = offset.unwrap_or(0).max(0) as usize;
    let limit = limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepo {
    async fn create(&self, input: &CreateNotification) -> Result<Notification, sqlx::Error> {
        let mut table = self.table.write().await;
        let id = table.allocate();
        let row = Notification {
            id,
            target_type: input.target.entity_type.clone(),
            target_id: input.target.id,
            notifiable_type: input.notifiable.entity_type.clone(),
            notifiable_id: input.notifiable.id,
            key: input.key.clone(),
            group_type: input.group.as_ref().map(|g| g.entity_type.clone()),
            group_id: input.group.as_ref().map(|g| g.id),
            group_owner_id: input.group_owner_id,
            group_key: input.group_key.clone(),
            notifier_type: input.notifier.as_ref().map(|n| n.entity_type.clone()),
            notifier_id: input.notifier.as_ref().map(|n| n.id),
            parameters: input.parameters.clone(),
            opened_at: None,
            batched: false,
            batch_attempts: 0,
            delivered_at: None,
            created_at: input.created_at,
            updated_at: input.created_at,
        };
        table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Notification>, sqlx::Error> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn find_group_owner(
        &self,
        query: &GroupOwnerQuery,
    ) -> Result<Option<Notification>, sqlx::Error> {
        let table = self.table.read().await;
        let owner = table
            .rows
            .values()
            .filter(|n| n.is_group_owner() && !n.is_opened())
            .filter(|n| n.in_group_scope(&query.target, &query.key, &query.scope))
            .filter(|n| n.group() == query.group)
            .filter(|n| query.created_after.map_or(true, |after| n.created_at > after))
            .min_by(|a, b| recency_cmp((a.created_at, a.id), (b.created_at, b.id)));
        Ok(owner.cloned())
    }

    async fn touch(&self, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let mut table = self.table.write().await;
        Ok(match table.rows.get_mut(&id) {
            Some(row) => {
                row.updated_at = at;
                true
            }
            None => false,
        })
    }

    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, sqlx::Error> {
        let table = self.table.read().await;
        let mut rows: Vec<Notification> = table
            .rows
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        sort_rows(&mut rows, filter.order);
        Ok(page(rows, filter.limit, filter.offset))
    }

    async fn count(&self, filter: &NotificationFilter) -> Result<i64, sqlx::Error> {
        let table = self.table.read().await;
        Ok(table.rows.values().filter(|n| filter.matches(n)).count() as i64)
    }

    async fn open(
        &self,
        id: DbId,
        at: Timestamp,
        with_members: bool,
    ) -> Result<u64, sqlx::Error> {
        let mut table = self.table.write().await;
        let mut opened = 0;
        for row in table.rows.values_mut() {
            let selected = row.id == id || (with_members && row.group_owner_id == Some(id));
            if selected && row.opened_at.is_none() {
                row.opened_at = Some(at);
                row.updated_at = at;
                opened += 1;
            }
        }
        Ok(opened)
    }

    async fn open_all(
        &self,
        filter: &NotificationFilter,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let mut table = self.table.write().await;
        let mut opened = 0;
        for row in table.rows.values_mut() {
            if row.opened_at.is_none() && filter.matches(row) {
                row.opened_at = Some(at);
                row.updated_at = at;
                opened += 1;
            }
        }
        Ok(opened)
    }

    async fn count_distinct_notifiers(&self, owner_id: DbId) -> Result<i64, sqlx::Error> {
        let table = self.table.read().await;
        let mut notifiers: Vec<EntityRef> = table
            .rows
            .values()
            .filter(|n| n.id == owner_id || n.group_owner_id == Some(owner_id))
            .filter_map(|n| n.notifier())
            .collect();
        notifiers.sort();
        notifiers.dedup();
        Ok(notifiers.len() as i64)
    }

    async fn destroy(&self, id: DbId) -> Result<bool, sqlx::Error> {
        let mut table = self.table.write().await;
        if table.rows.remove(&id).is_none() {
            return Ok(false);
        }

        let successor = table
            .rows
            .values()
            .filter(|n| n.group_owner_id == Some(id))
            .min_by(|a, b| recency_cmp((b.created_at, b.id), (a.created_at, a.id)))
            .map(|n| n.id);

        if let Some(successor) = successor {
            let mut moved = 0;
            for row in table.rows.values_mut() {
                if row.id == successor {
                    row.group_owner_id = None;
                } else if row.group_owner_id == Some(id) {
                    row.group_owner_id = Some(successor);
                    moved += 1;
                }
            }
            tracing::debug!(
                owner_id = id,
                successor_id = successor,
                members = moved,
                "Group owner promoted"
            );
        }
        Ok(true)
    }

    async fn mark_batched(&self, id: DbId) -> Result<bool, sqlx::Error> {
        let mut table = self.table.write().await;
        Ok(match table.rows.get_mut(&id) {
            Some(row) if row.delivered_at.is_none() => {
                row.batched = true;
                true
            }
            _ => false,
        })
    }

    async fn mark_delivered(&self, ids: &[DbId], at: Timestamp) -> Result<u64, sqlx::Error> {
        let mut table = self.table.write().await;
        let mut marked = 0;
        for id in ids {
            if let Some(row) = table.rows.get_mut(id) {
                if row.delivered_at.is_none() {
                    row.delivered_at = Some(at);
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn list_pending_batch(&self, limit: i64) -> Result<Vec<Notification>, sqlx::Error> {
        let table = self.table.read().await;
        let mut rows: Vec<Notification> = table
            .rows
            .values()
            .filter(|n| n.batched && n.delivered_at.is_none())
            .cloned()
            .collect();
        sort_rows(&mut rows, SortOrder::Earliest);
        rows.sort_by_key(|n| n.batch_attempts);
        Ok(page(rows, Some(limit), None))
    }

    async fn record_batch_failure(&self, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        let mut table = self.table.write().await;
        let mut recorded = 0;
        for id in ids {
            if let Some(row) = table.rows.get_mut(id) {
                if row.delivered_at.is_none() {
                    row.batch_attempts += 1;
                    recorded += 1;
                }
            }
        }
        Ok(recorded)
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    table: RwLock<Table<Subscription>>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_key(s: &Subscription, target: &EntityRef, key: &str) -> bool {
    s.target_type == target.entity_type && s.target_id == target.id && s.key == key
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepo {
    async fn find(
        &self,
        target: &EntityRef,
        key: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|s| same_key(s, target, key))
            .cloned())
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Subscription>, sqlx::Error> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn find_or_create(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        let mut table = self.table.write().await;
        if let Some(existing) = table
            .rows
            .values()
            .find(|s| same_key(s, &input.target, &input.key))
        {
            return Ok(existing.clone());
        }
        let id = table.allocate();
        let row = input.clone().into_subscription(id);
        table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn update(&self, subscription: &Subscription) -> Result<Subscription, sqlx::Error> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(&subscription.id)
            .ok_or(sqlx::Error::RowNotFound)?;
        row.subscribing = subscription.subscribing;
        row.subscribing_to_email = subscription.subscribing_to_email;
        row.subscribed_at = subscription.subscribed_at;
        row.unsubscribed_at = subscription.unsubscribed_at;
        row.subscribed_to_email_at = subscription.subscribed_to_email_at;
        row.unsubscribed_to_email_at = subscription.unsubscribed_to_email_at;
        row.optional_targets = subscription.optional_targets.clone();
        row.updated_at = subscription.updated_at;
        Ok(row.clone())
    }

    async fn list_for_target(
        &self,
        target: &EntityRef,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let table = self.table.read().await;
        let mut rows: Vec<Subscription> = table
            .rows
            .values()
            .filter(|s| s.target_type == target.entity_type && s.target_id == target.id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(page(rows, Some(limit), Some(offset)))
    }

    async fn destroy(&self, id: DbId) -> Result<bool, sqlx::Error> {
        Ok(self.table.write().await.rows.remove(&id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Target directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTargetDirectory {
    profiles: RwLock<HashMap<EntityRef, TargetProfile>>,
}

impl InMemoryTargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetDirectory for InMemoryTargetDirectory {
    async fn find(&self, target: &EntityRef) -> Result<Option<TargetProfile>, sqlx::Error> {
        Ok(self.profiles.read().await.get(target).cloned())
    }

    async fn upsert(&self, profile: &TargetProfile) -> Result<TargetProfile, sqlx::Error> {
        self.profiles
            .write()
            .await
            .insert(profile.entity.clone(), profile.clone());
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};
    use tidings_core::config::ActivityConfig;
    use tidings_core::grouping::GroupScope;

    use super::*;
    use crate::models::notification::OpenedFilter;

    fn create_input(at: Timestamp, owner: Option<DbId>) -> CreateNotification {
        CreateNotification {
            target: EntityRef::new("User", 1),
            notifiable: EntityRef::new("Comment", 10),
            key: "comment.create".into(),
            group: None,
            group_owner_id: owner,
            group_key: None,
            notifier: None,
            parameters: serde_json::json!({}),
            created_at: at,
        }
    }

    fn owner_query(created_after: Option<Timestamp>) -> GroupOwnerQuery {
        GroupOwnerQuery {
            target: EntityRef::new("User", 1),
            key: "comment.create".into(),
            scope: GroupScope::NotifiableType("Comment".into()),
            group: None,
            created_after,
        }
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ids_are_sequential() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let a = repo.create(&create_input(now, None)).await.unwrap();
        let b = repo.create(&create_input(now, None)).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.updated_at, now);
    }

    #[tokio::test]
    async fn group_owner_lookup_prefers_most_recent() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        repo.create(&create_input(now - Duration::minutes(5), None))
            .await
            .unwrap();
        let newer = repo.create(&create_input(now, None)).await.unwrap();
        let tied = repo.create(&create_input(now, None)).await.unwrap();
        repo.create(&create_input(now, Some(newer.id))).await.unwrap();

        let owner = repo.find_group_owner(&owner_query(None)).await.unwrap();
        assert_eq!(owner.map(|o| o.id), Some(tied.id));
    }

    #[tokio::test]
    async fn group_owner_lookup_respects_window_and_opened() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let old = repo
            .create(&create_input(now - Duration::hours(2), None))
            .await
            .unwrap();

        let cutoff = Some(now - Duration::hours(1));
        assert!(repo.find_group_owner(&owner_query(cutoff)).await.unwrap().is_none());
        assert!(repo.find_group_owner(&owner_query(None)).await.unwrap().is_some());

        repo.open(old.id, now, true).await.unwrap();
        assert!(repo.find_group_owner(&owner_query(None)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_is_first_open_wins() {
        let repo = InMemoryNotificationRepo::new();
        let first = Utc::now();
        let n = repo.create(&create_input(first, None)).await.unwrap();

        assert_eq!(repo.open(n.id, first, true).await.unwrap(), 1);
        let later = first + Duration::seconds(30);
        assert_eq!(repo.open(n.id, later, true).await.unwrap(), 0);

        let stored = repo.find_by_id(n.id).await.unwrap().unwrap();
        assert_eq!(stored.opened_at, Some(first));
    }

    #[tokio::test]
    async fn open_with_members_opens_group() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let owner = repo.create(&create_input(now, None)).await.unwrap();
        let member = repo.create(&create_input(now, Some(owner.id))).await.unwrap();

        assert_eq!(repo.open(owner.id, now, false).await.unwrap(), 1);
        let stored = repo.find_by_id(member.id).await.unwrap().unwrap();
        assert!(!stored.is_opened());

        let other = repo.create(&create_input(now, None)).await.unwrap();
        let other_member = repo.create(&create_input(now, Some(other.id))).await.unwrap();
        assert_eq!(repo.open(other.id, now, true).await.unwrap(), 2);
        let stored = repo.find_by_id(other_member.id).await.unwrap().unwrap();
        assert!(stored.is_opened());
    }

    #[tokio::test]
    async fn open_all_counts_only_unopened() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let a = repo.create(&create_input(now, None)).await.unwrap();
        repo.create(&create_input(now, None)).await.unwrap();
        repo.open(a.id, now, true).await.unwrap();

        let filter = NotificationFilter::for_target(EntityRef::new("User", 1));
        assert_eq!(repo.open_all(&filter, now).await.unwrap(), 1);
        let unopened = filter.clone().opened(OpenedFilter::Unopened);
        assert_eq!(repo.count(&unopened).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_orders_and_pages() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        for i in 0..4 {
            repo.create(&create_input(now + Duration::seconds(i), None))
                .await
                .unwrap();
        }
        let latest = repo
            .list(&NotificationFilter::default().limit(2))
            .await
            .unwrap();
        assert_eq!(latest.iter().map(|n| n.id).collect::<Vec<_>>(), vec![4, 3]);

        let earliest = repo
            .list(&NotificationFilter {
                offset: Some(1),
                ..NotificationFilter::default().order(SortOrder::Earliest).limit(2)
            })
            .await
            .unwrap();
        assert_eq!(earliest.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn destroy_owner_promotes_earliest_member() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let owner = repo.create(&create_input(now, None)).await.unwrap();
        let first = repo
            .create(&create_input(now + Duration::seconds(1), Some(owner.id)))
            .await
            .unwrap();
        let second = repo
            .create(&create_input(now + Duration::seconds(2), Some(owner.id)))
            .await
            .unwrap();

        assert!(repo.destroy(owner.id).await.unwrap());
        assert!(repo.find_by_id(owner.id).await.unwrap().is_none());

        let promoted = repo.find_by_id(first.id).await.unwrap().unwrap();
        assert!(promoted.is_group_owner());
        let moved = repo.find_by_id(second.id).await.unwrap().unwrap();
        assert_eq!(moved.group_owner_id, Some(first.id));

        assert!(!repo.destroy(owner.id).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_notifiers_cover_owner_and_members() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let mut input = create_input(now, None);
        input.notifier = Some(EntityRef::new("User", 7));
        let owner = repo.create(&input).await.unwrap();

        input.group_owner_id = Some(owner.id);
        repo.create(&input).await.unwrap();
        input.notifier = Some(EntityRef::new("User", 8));
        repo.create(&input).await.unwrap();
        input.notifier = None;
        repo.create(&input).await.unwrap();

        assert_eq!(repo.count_distinct_notifiers(owner.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn batch_bookkeeping() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let a = repo.create(&create_input(now, None)).await.unwrap();
        let b = repo.create(&create_input(now, None)).await.unwrap();

        assert!(repo.mark_batched(a.id).await.unwrap());
        assert!(repo.mark_batched(b.id).await.unwrap());
        assert_eq!(repo.list_pending_batch(10).await.unwrap().len(), 2);

        assert_eq!(repo.mark_delivered(&[a.id], now).await.unwrap(), 1);
        assert_eq!(repo.mark_delivered(&[a.id], now).await.unwrap(), 0);
        let pending = repo.list_pending_batch(10).await.unwrap();
        assert_eq!(pending.iter().map(|n| n.id).collect::<Vec<_>>(), vec![b.id]);
        assert!(!repo.mark_batched(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_batch_rows_sort_after_fresh_ones() {
        let repo = InMemoryNotificationRepo::new();
        let now = Utc::now();
        let old = repo.create(&create_input(now, None)).await.unwrap();
        let new = repo
            .create(&create_input(now + Duration::seconds(1), None))
            .await
            .unwrap();
        repo.mark_batched(old.id).await.unwrap();
        repo.mark_batched(new.id).await.unwrap();

        assert_eq!(repo.record_batch_failure(&[old.id]).await.unwrap(), 1);
        let pending = repo.list_pending_batch(1).await.unwrap();
        assert_eq!(pending[0].id, new.id);
        assert_eq!(repo.find_by_id(old.id).await.unwrap().unwrap().batch_attempts, 1);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn find_or_create_returns_existing_row() {
        let repo = InMemorySubscriptionRepo::new();
        let target = EntityRef::new("User", 1);
        let config = ActivityConfig::default();
        let input = CreateSubscription::with_defaults(target.clone(), "a.b", &config, Utc::now());

        let first = repo.find_or_create(&input).await.unwrap();
        let second = repo.find_or_create(&input).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.list_for_target(&target, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_persists_transitions() {
        let repo = InMemorySubscriptionRepo::new();
        let target = EntityRef::new("User", 1);
        let input = CreateSubscription::with_defaults(
            target.clone(),
            "a.b",
            &ActivityConfig::default(),
            Utc::now(),
        );
        let mut sub = repo.find_or_create(&input).await.unwrap();
        sub.unsubscribe(Utc::now());
        repo.update(&sub).await.unwrap();

        let stored = repo.find(&target, "a.b").await.unwrap().unwrap();
        assert!(!stored.subscribing);
        assert!(stored.unsubscribed_at.is_some());
    }

    #[tokio::test]
    async fn update_of_missing_row_is_row_not_found() {
        let repo = InMemorySubscriptionRepo::new();
        let sub = CreateSubscription::with_defaults(
            EntityRef::new("User", 1),
            "a.b",
            &ActivityConfig::default(),
            Utc::now(),
        )
        .into_subscription(42);
        assert_matches!(repo.update(&sub).await, Err(sqlx::Error::RowNotFound));
    }

    // -----------------------------------------------------------------------
    // Target directory
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn upsert_replaces_profile() {
        let dir = InMemoryTargetDirectory::new();
        let entity = EntityRef::new("User", 1);
        dir.upsert(&TargetProfile::new(entity.clone()).with_email("a@x.test"))
            .await
            .unwrap();
        dir.upsert(&TargetProfile::new(entity.clone()).with_email("b@x.test"))
            .await
            .unwrap();
        let found = dir.find(&entity).await.unwrap().unwrap();
        assert_eq!(found.email.as_deref(), Some("b@x.test"));
        assert!(dir.find(&EntityRef::new("User", 2)).await.unwrap().is_none());
    }
}
