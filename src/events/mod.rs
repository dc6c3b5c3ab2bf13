//! Event system for session notifications
//!
//! A [`StreamSession`](crate::webrtc::StreamSession) publishes state
//! changes, remote tracks and user-facing notifications here; a UI or the
//! CLI subscribes and renders them.

pub mod types;

pub use types::{NotificationLevel, SessionEvent};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting session events
///
/// # Example
///
/// ```no_run
/// use rtgen_client::events::{EventBus, SessionEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SessionEvent::error("stream stopped by backend"));
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}: {:?}", event.event_name(), event);
///     }
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Events published while nobody is subscribed are dropped.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls too far behind receives `Lagged` and misses
    /// the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::StreamStopped {
            error_message: Some("GPU lost".to_string()),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::StreamStopped {
                error_message: Some("GPU lost".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(SessionEvent::warning("data channel not open"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::Notification {
                level: NotificationLevel::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SessionEvent::error("nobody listening"));
    }
}
