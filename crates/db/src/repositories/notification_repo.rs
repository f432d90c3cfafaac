//! PostgreSQL repository for the `notifications` table.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tidings_core::grouping::GroupScope;
use tidings_core::types::{DbId, SortOrder, Timestamp};

use super::NotificationRepository;
use crate::models::notification::{
    CreateNotification, GroupOwnerQuery, Notification, NotificationFilter, OpenedFilter,
};

/// Column list for `notifications` queries.
const COLUMNS: &str = "id, target_type, target_id, notifiable_type, notifiable_id, key, \
    group_type, group_id, group_owner_id, group_key, notifier_type, notifier_id, \
    parameters, opened_at, batched, batch_attempts, delivered_at, created_at, updated_at";

pub struct PgNotificationRepo {
    pool: PgPool,
}

impl PgNotificationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Append the `WHERE` clause for `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &NotificationFilter) {
    qb.push(" WHERE TRUE");
    if let Some(target) = &filter.target {
        qb.push(" AND target_type = ")
            .push_bind(target.entity_type.clone())
            .push(" AND target_id = ")
            .push_bind(target.id);
    }
    match filter.opened {
        OpenedFilter::All => {}
        OpenedFilter::Opened => {
            qb.push(" AND opened_at IS NOT NULL");
        }
        OpenedFilter::Unopened => {
            qb.push(" AND opened_at IS NULL");
        }
    }
    if let Some(key) = &filter.key {
        qb.push(" AND key = ").push_bind(key.clone());
    }
    if let Some(notifiable_type) = &filter.notifiable_type {
        qb.push(" AND notifiable_type = ")
            .push_bind(notifiable_type.clone());
    }
    if let Some(notifiable) = &filter.notifiable {
        qb.push(" AND notifiable_type = ")
            .push_bind(notifiable.entity_type.clone())
            .push(" AND notifiable_id = ")
            .push_bind(notifiable.id);
    }
    if let Some(group) = &filter.group {
        qb.push(" AND group_type = ")
            .push_bind(group.entity_type.clone())
            .push(" AND group_id = ")
            .push_bind(group.id);
    }
    if let Some(owner_id) = filter.group_owner_id {
        qb.push(" AND group_owner_id = ").push_bind(owner_id);
    }
    if filter.owners_only {
        qb.push(" AND group_owner_id IS NULL");
    }
    if let Some(later_than) = filter.later_than {
        qb.push(" AND created_at > ").push_bind(later_than);
    }
    if let Some(earlier_than) = filter.earlier_than {
        qb.push(" AND created_at < ").push_bind(earlier_than);
    }
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Latest => " ORDER BY created_at DESC, id DESC",
        SortOrder::Earliest => " ORDER BY created_at ASC, id ASC",
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepo {
    async fn create(&self, input: &CreateNotification) -> Result<Notification, sqlx::Error> {
        let query = format!(
            "INSERT INTO notifications \
                (target_type, target_id, notifiable_type, notifiable_id, key, \
                 group_type, group_id, group_owner_id, group_key, \
                 notifier_type, notifier_id, parameters, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(&input.target.entity_type)
            .bind(input.target.id)
            .bind(&input.notifiable.entity_type)
            .bind(input.notifiable.id)
            .bind(&input.key)
            .bind(input.group.as_ref().map(|g| g.entity_type.as_str()))
            .bind(input.group.as_ref().map(|g| g.id))
            .bind(input.group_owner_id)
            .bind(input.group_key.as_deref())
            .bind(input.notifier.as_ref().map(|n| n.entity_type.as_str()))
            .bind(input.notifier.as_ref().map(|n| n.id))
            .bind(&input.parameters)
            .bind(input.created_at)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Notification>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_group_owner(
        &self,
        query: &GroupOwnerQuery,
    ) -> Result<Option<Notification>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE group_owner_id IS NULL AND opened_at IS NULL"
        ));
        qb.push(" AND target_type = ")
            .push_bind(query.target.entity_type.clone())
            .push(" AND target_id = ")
            .push_bind(query.target.id)
            .push(" AND key = ")
            .push_bind(query.key.clone());
        match &query.scope {
            GroupScope::NotifiableType(notifiable_type) => {
                qb.push(" AND group_key IS NULL AND notifiable_type = ")
                    .push_bind(notifiable_type.clone());
            }
            GroupScope::Override(group_key) => {
                qb.push(" AND group_key = ").push_bind(group_key.clone());
            }
        }
        match &query.group {
            Some(group) => {
                qb.push(" AND group_type = ")
                    .push_bind(group.entity_type.clone())
                    .push(" AND group_id = ")
                    .push_bind(group.id);
            }
            None => {
                qb.push(" AND group_type IS NULL");
            }
        }
        if let Some(created_after) = query.created_after {
            qb.push(" AND created_at > ").push_bind(created_after);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT 1");
        qb.build_query_as::<Notification>()
            .fetch_optional(&self.pool)
            .await
    }

    async fn touch(&self, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE notifications SET updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM notifications"));
        push_filter(&mut qb, filter);
        qb.push(order_clause(filter.order));
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            qb.push(" OFFSET ").push_bind(offset);
        }
        qb.build_query_as::<Notification>()
            .fetch_all(&self.pool)
            .await
    }

    async fn count(&self, filter: &NotificationFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM notifications");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>().fetch_one(&self.pool).await
    }

    async fn open(
        &self,
        id: DbId,
        at: Timestamp,
        with_members: bool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET opened_at = $2, updated_at = $2 \
             WHERE opened_at IS NULL \
               AND (id = $1 OR ($3 AND group_owner_id = $1))",
        )
        .bind(id)
        .bind(at)
        .bind(with_members)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn open_all(
        &self,
        filter: &NotificationFilter,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE notifications SET opened_at = ");
        qb.push_bind(at).push(", updated_at = ").push_bind(at);
        push_filter(&mut qb, filter);
        qb.push(" AND opened_at IS NULL");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count_distinct_notifiers(&self, owner_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(DISTINCT (notifier_type, notifier_id)) FROM notifications \
             WHERE (id = $1 OR group_owner_id = $1) AND notifier_type IS NOT NULL",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn destroy(&self, id: DbId) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let successor: Option<DbId> = sqlx::query_scalar(
            "SELECT id FROM notifications WHERE group_owner_id = $1 \
             ORDER BY created_at ASC, id ASC LIMIT 1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(successor) = successor {
            sqlx::query("UPDATE notifications SET group_owner_id = NULL WHERE id = $1")
                .bind(successor)
                .execute(&mut *tx)
                .await?;
            let moved = sqlx::query(
                "UPDATE notifications SET group_owner_id = $2 WHERE group_owner_id = $1",
            )
            .bind(id)
            .bind(successor)
            .execute(&mut *tx)
            .await?;
            tracing::debug!(
                owner_id = id,
                successor_id = successor,
                members = moved.rows_affected(),
                "Group owner promoted"
            );
        }

        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(notification_id = id, deleted = result.rows_affected(), "Notification deleted");
        Ok(result.rows_affected() > 0)
    }

    async fn mark_batched(&self, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET batched = true WHERE id = $1 AND delivered_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(&self, ids: &[DbId], at: Timestamp) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE notifications SET delivered_at = $2 \
             WHERE id = ANY($1) AND delivered_at IS NULL",
        )
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_pending_batch(&self, limit: i64) -> Result<Vec<Notification>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE batched AND delivered_at IS NULL \
             ORDER BY batch_attempts ASC, created_at ASC, id ASC \
             LIMIT $1"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    async fn record_batch_failure(&self, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE notifications SET batch_attempts = batch_attempts + 1 \
             WHERE id = ANY($1) AND delivered_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
