//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`NotificationEvent`]s from `notify` to the
//! background [`DeliveryWorker`](crate::dispatcher::DeliveryWorker) when
//! delivery is deferred. It is shared via `Arc<EventBus>`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tidings_core::descriptor::{NotifiableDescriptor, NotifierDescriptor};
use tidings_core::entity::EntityRef;
use tidings_core::types::{DbId, Timestamp};
use tidings_db::models::notification::Notification;
use tokio::sync::broadcast;

/// Event type published for every stored notification awaiting delivery.
pub const EVENT_NOTIFICATION_CREATED: &str = "notification.created";

// ---------------------------------------------------------------------------
// NotificationEvent
// ---------------------------------------------------------------------------

/// A stored notification whose delivery has not run yet.
///
/// Carries the caller-supplied descriptors so the worker can rebuild the
/// notifiable and notifier policies without another round trip to the
/// host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Dot-separated event name, e.g. `"notification.created"`.
    pub event_type: String,
    pub notification_id: DbId,
    pub target: EntityRef,
    pub key: String,
    pub notifiable: NotifiableDescriptor,
    pub notifier: Option<NotifierDescriptor>,
    /// Whether the notification joined an existing group.
    pub merged: bool,
    pub send_email: bool,
    pub timestamp: Timestamp,
}

impl NotificationEvent {
    /// Event for a freshly created notification.
    pub fn created(
        notification: &Notification,
        notifiable: NotifiableDescriptor,
        notifier: Option<NotifierDescriptor>,
        send_email: bool,
    ) -> Self {
        Self {
            event_type: EVENT_NOTIFICATION_CREATED.to_string(),
            notification_id: notification.id,
            target: notification.target(),
            key: notification.key.clone(),
            notifiable,
            notifier,
            merged: notification.is_group_member(),
            send_email,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use tidings_events::bus::EventBus;
///
/// let bus = EventBus::default();
/// let _rx = bus.subscribe();
/// assert_eq!(bus.receiver_count(), 1);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns `false` when nobody is listening and the event was dropped.
    pub fn publish(&self, event: NotificationEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: DbId) -> NotificationEvent {
        NotificationEvent {
            event_type: EVENT_NOTIFICATION_CREATED.to_string(),
            notification_id: id,
            target: EntityRef::new("User", 1),
            key: "comment.create".into(),
            notifiable: NotifiableDescriptor::new(EntityRef::new("Comment", 2)),
            notifier: None,
            merged: false,
            send_email: true,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        assert!(bus.publish(event(42)));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, EVENT_NOTIFICATION_CREATED);
        assert_eq!(received.notification_id, 42);
        assert_eq!(received.target, EntityRef::new("User", 1));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(event(1));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.notification_id, e2.notification_id);
    }

    #[test]
    fn publish_with_no_subscribers_reports_drop() {
        let bus = EventBus::default();
        assert!(!bus.publish(event(1)));
    }
}
