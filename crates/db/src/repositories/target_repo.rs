//! PostgreSQL directory backed by the `target_profiles` table.

use async_trait::async_trait;
use sqlx::PgPool;
use tidings_core::entity::EntityRef;

use super::TargetDirectory;
use crate::models::target::TargetProfile;

/// Column list for `target_profiles` queries.
const COLUMNS: &str = "target_type, target_id, email, display_name, \
    email_allowed, batch_email_allowed, subscription_allowed";

pub struct PgTargetDirectory {
    pool: PgPool,
}

impl PgTargetDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TargetDirectory for PgTargetDirectory {
    async fn find(&self, target: &EntityRef) -> Result<Option<TargetProfile>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM target_profiles WHERE target_type = $1 AND target_id = $2"
        );
        sqlx::query_as::<_, TargetProfile>(&query)
            .bind(&target.entity_type)
            .bind(target.id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn upsert(&self, profile: &TargetProfile) -> Result<TargetProfile, sqlx::Error> {
        let query = format!(
            "INSERT INTO target_profiles \
                (target_type, target_id, email, display_name, \
                 email_allowed, batch_email_allowed, subscription_allowed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (target_type, target_id) DO UPDATE SET \
                email = EXCLUDED.email, \
                display_name = EXCLUDED.display_name, \
                email_allowed = EXCLUDED.email_allowed, \
                batch_email_allowed = EXCLUDED.batch_email_allowed, \
                subscription_allowed = EXCLUDED.subscription_allowed, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TargetProfile>(&query)
            .bind(&profile.entity.entity_type)
            .bind(profile.entity.id)
            .bind(profile.email.as_deref())
            .bind(profile.display_name.as_deref())
            .bind(profile.email_allowed)
            .bind(profile.batch_email_allowed)
            .bind(profile.subscription_allowed)
            .fetch_one(&self.pool)
            .await
    }
}
