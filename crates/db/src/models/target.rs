//! Target profile model: the directory entry for an addressable recipient.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use tidings_core::config::ActivityConfig;
use tidings_core::entity::EntityRef;
use tidings_core::policy::Target;

/// A row from the `target_profiles` table.
///
/// The nullable policy columns override the configured defaults for this
/// target only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    #[serde(flatten)]
    pub entity: EntityRef,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_allowed: Option<bool>,
    #[serde(default)]
    pub batch_email_allowed: Option<bool>,
    #[serde(default)]
    pub subscription_allowed: Option<bool>,
}

impl TargetProfile {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            email: None,
            display_name: None,
            email_allowed: None,
            batch_email_allowed: None,
            subscription_allowed: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl<'r> FromRow<'r, PgRow> for TargetProfile {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            entity: EntityRef::new(
                row.try_get::<String, _>("target_type")?,
                row.try_get("target_id")?,
            ),
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            email_allowed: row.try_get("email_allowed")?,
            batch_email_allowed: row.try_get("batch_email_allowed")?,
            subscription_allowed: row.try_get("subscription_allowed")?,
        })
    }
}

impl Target for TargetProfile {
    fn entity(&self) -> &EntityRef {
        &self.entity
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn printable_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.entity.to_string())
    }

    fn email_allowed(&self, _key: &str, config: &ActivityConfig) -> bool {
        self.email_allowed.unwrap_or(config.email_enabled)
    }

    fn batch_email_allowed(&self, _key: &str, config: &ActivityConfig) -> bool {
        self.batch_email_allowed
            .unwrap_or(config.email_enabled && config.batch_email_enabled)
    }

    fn subscription_allowed(&self, _key: &str, config: &ActivityConfig) -> bool {
        self.subscription_allowed
            .unwrap_or(config.subscription_enabled)
    }
}
