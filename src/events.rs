//! Update fan-out to front-end subscribers.
//!
//! The receive loop publishes decoded state changes here; each front-end
//! session holds its own receiver. Backed by a bounded
//! `tokio::sync::broadcast` channel: `publish` never blocks, and a
//! subscriber that falls more than [`UpdateBus::capacity`] events behind
//! loses the oldest buffered events (it is told how many via
//! `RecvError::Lagged`). Subscribers drop out by dropping the receiver;
//! publishers and other subscribers are unaffected.

use crate::meters::MeterFrame;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// One state-change record, tagged for the front end.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Update {
    /// A fader moved, on the console or through this bridge.
    Fader { channel: String, value: f32 },
    /// A mute toggled. `on` follows the console convention: `true`
    /// means the channel is audible.
    Mute { channel: String, on: bool },
    /// Fresh main-output levels.
    Meter {
        left_db: f32,
        right_db: f32,
        timestamp_ms: u64,
    },
}

impl From<MeterFrame> for Update {
    fn from(frame: MeterFrame) -> Self {
        Update::Meter {
            left_db: frame.left_db,
            right_db: frame.right_db,
            timestamp_ms: frame.timestamp_ms,
        }
    }
}

/// Multi-producer, multi-consumer event bus.
#[derive(Debug, Clone)]
pub struct UpdateBus {
    tx: broadcast::Sender<Update>,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to every current subscriber. Best effort: with
    /// no subscribers the event is simply dropped.
    pub fn publish(&self, update: Update) {
        let _ = self.tx.send(update);
    }

    /// New independent subscription; yields events in publish order.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_events_in_publish_order() {
        let bus = UpdateBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(Update::Fader {
            channel: "Headset 1".to_string(),
            value: 0.5,
        });
        bus.publish(Update::Mute {
            channel: "master".to_string(),
            on: false,
        });

        for rx in [&mut a, &mut b] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                Update::Fader { ref channel, value } if channel == "Headset 1" && value == 0.5
            ));
            assert!(matches!(
                rx.recv().await.unwrap(),
                Update::Mute { ref channel, on: false } if channel == "master"
            ));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_no_op() {
        let bus = UpdateBus::new();
        bus.publish(Update::Meter {
            left_db: -6.0,
            right_db: -6.0,
            timestamp_ms: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let bus = UpdateBus::new();
        let gone = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(gone);

        bus.publish(Update::Fader {
            channel: "Hand 1".to_string(),
            value: 1.0,
        });
        assert!(kept.recv().await.is_ok());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_drops_oldest() {
        let bus = UpdateBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for value in [0.1f32, 0.2, 0.3] {
            bus.publish(Update::Fader {
                channel: "HDMI".to_string(),
                value,
            });
        }

        // Oldest event (0.1) was overwritten
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Update::Fader { value, .. } if value == 0.2
        ));
    }

    #[test]
    fn test_events_serialize_with_kind_tag() {
        let json = serde_json::to_value(Update::Fader {
            channel: "Headset 1".to_string(),
            value: 0.5,
        })
        .unwrap();
        assert_eq!(json["kind"], "fader");
        assert_eq!(json["channel"], "Headset 1");

        let json = serde_json::to_value(Update::Mute {
            channel: "master".to_string(),
            on: true,
        })
        .unwrap();
        assert_eq!(json["kind"], "mute");
        assert_eq!(json["on"], true);
    }
}
