//! Pure grouping rules shared by every notification repository.
//!
//! A notification joins the open group of the most recent unopened group
//! owner that matches its target, key and [`GroupScope`] (and explicit
//! group, when one is given) inside the lookback window.

use std::cmp::Ordering;
use std::time::Duration;

use crate::policy::Notifiable;
use crate::types::{DbId, Timestamp};

/// What notifications must share, besides target and key, to be grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupScope {
    /// Same notifiable type, no per-instance override.
    NotifiableType(String),
    /// Same per-instance group key.
    Override(String),
}

impl GroupScope {
    pub fn of(notifiable: &dyn Notifiable) -> Self {
        match notifiable.group_key_override() {
            Some(key) => GroupScope::Override(key.to_string()),
            None => GroupScope::NotifiableType(notifiable.entity().entity_type.clone()),
        }
    }

    /// Whether a stored notification with these columns falls in scope.
    pub fn matches(&self, notifiable_type: &str, group_key: Option<&str>) -> bool {
        match self {
            GroupScope::NotifiableType(t) => group_key.is_none() && notifiable_type == t,
            GroupScope::Override(k) => group_key == Some(k.as_str()),
        }
    }
}

/// Earliest `created_at` a group owner may have. `None` is unbounded.
///
/// Delays too large to represent are treated as unbounded.
pub fn expiry_cutoff(now: Timestamp, delay: Option<Duration>) -> Option<Timestamp> {
    let delay = chrono::Duration::from_std(delay?).ok()?;
    now.checked_sub_signed(delay)
}

/// Most-recent-first ordering with id descending as the tie-break.
pub fn recency_cmp(a: (Timestamp, DbId), b: (Timestamp, DbId)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1))
}
