use serde::{Deserialize, Serialize};

/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Ordering applied to notification listings by `created_at`, then `id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest first.
    #[default]
    Latest,
    /// Oldest first.
    Earliest,
}

impl SortOrder {
    pub fn reversed(self) -> Self {
        match self {
            SortOrder::Latest => SortOrder::Earliest,
            SortOrder::Earliest => SortOrder::Latest,
        }
    }
}
