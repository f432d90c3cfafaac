//! PostgreSQL repository for the `subscriptions` table.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tidings_core::entity::EntityRef;
use tidings_core::types::DbId;

use super::SubscriptionRepository;
use crate::models::subscription::{CreateSubscription, Subscription};

/// Column list for `subscriptions` queries.
const COLUMNS: &str = "id, target_type, target_id, key, subscribing, subscribing_to_email, \
    subscribed_at, unsubscribed_at, subscribed_to_email_at, unsubscribed_to_email_at, \
    optional_targets, created_at, updated_at";

pub struct PgSubscriptionRepo {
    pool: PgPool,
}

impl PgSubscriptionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepo {
    async fn find(
        &self,
        target: &EntityRef,
        key: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM subscriptions \
             WHERE target_type = $1 AND target_id = $2 AND key = $3"
        );
        sqlx::query_as::<_, Subscription>(&query)
            .bind(&target.entity_type)
            .bind(target.id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Subscription>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM subscriptions WHERE id = $1");
        sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_or_create(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        // A concurrent insert for the same (target, key) makes this a no-op;
        // the read below then returns the winner's row.
        sqlx::query(
            "INSERT INTO subscriptions \
                (target_type, target_id, key, subscribing, subscribing_to_email, \
                 subscribed_at, unsubscribed_at, subscribed_to_email_at, \
                 unsubscribed_to_email_at, optional_targets, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             ON CONFLICT (target_type, target_id, key) DO NOTHING",
        )
        .bind(&input.target.entity_type)
        .bind(input.target.id)
        .bind(&input.key)
        .bind(input.subscribing)
        .bind(input.subscribing_to_email)
        .bind(input.subscribed_at())
        .bind(input.unsubscribed_at())
        .bind(input.subscribed_to_email_at())
        .bind(input.unsubscribed_to_email_at())
        .bind(Json(&input.optional_targets))
        .bind(input.created_at)
        .execute(&self.pool)
        .await?;

        self.find(&input.target, &input.key)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    async fn update(&self, subscription: &Subscription) -> Result<Subscription, sqlx::Error> {
        let query = format!(
            "UPDATE subscriptions SET \
                subscribing = $2, \
                subscribing_to_email = $3, \
                subscribed_at = $4, \
                unsubscribed_at = $5, \
                subscribed_to_email_at = $6, \
                unsubscribed_to_email_at = $7, \
                optional_targets = $8, \
                updated_at = $9 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Subscription>(&query)
            .bind(subscription.id)
            .bind(subscription.subscribing)
            .bind(subscription.subscribing_to_email)
            .bind(subscription.subscribed_at)
            .bind(subscription.unsubscribed_at)
            .bind(subscription.subscribed_to_email_at)
            .bind(subscription.unsubscribed_to_email_at)
            .bind(Json(&subscription.optional_targets))
            .bind(subscription.updated_at)
            .fetch_one(&self.pool)
            .await
    }

    async fn list_for_target(
        &self,
        target: &EntityRef,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM subscriptions \
             WHERE target_type = $1 AND target_id = $2 \
             ORDER BY key ASC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Subscription>(&query)
            .bind(&target.entity_type)
            .bind(target.id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    async fn destroy(&self, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
