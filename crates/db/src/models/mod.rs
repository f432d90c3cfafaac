//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row and the create DTO used for inserts.

pub mod notification;
pub mod subscription;
pub mod target;

pub use notification::{
    CreateNotification, GroupOwnerQuery, GroupSummary, Notification, NotificationFilter,
    OpenedFilter,
};
pub use subscription::{CreateSubscription, OptionalTargetSubscription, OptionalTargets, Subscription};
pub use target::TargetProfile;
