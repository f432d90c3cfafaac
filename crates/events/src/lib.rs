//! Tidings notification services.
//!
//! - [`NotificationService`]: the notification store (create, query, open,
//!   destroy).
//! - [`SubscriptionService`]: per-(target, key) opt-in state.
//! - [`GroupingEngine`]: decides whether a notification joins an open
//!   group.
//! - [`Dispatcher`]: routes a stored notification to email and the
//!   optional targets in [`delivery`].
//! - [`ActivityNotifier`]: the `notify` entry point tying them together.
//! - [`EventBus`], [`DeliveryWorker`] and [`BatchScheduler`]: background
//!   delivery.

pub mod batch;
pub mod bus;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod grouping;
pub mod notifications;
pub mod notifier;
pub mod registry;
pub mod services;
pub mod subscriptions;

pub use batch::BatchScheduler;
pub use bus::{EventBus, NotificationEvent};
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use delivery::{ChannelOutcome, DeliveryReport, OptionalTargetRegistry};
pub use dispatcher::{DeliveryWorker, Dispatcher};
pub use error::ActivityError;
pub use grouping::GroupingEngine;
pub use notifications::NotificationService;
pub use notifier::{ActivityNotifier, NotifyOutcome, NotifyRequest};
pub use registry::{NotifiableRegistry, TargetRegistry};
pub use services::ActivityServices;
pub use subscriptions::SubscriptionService;
