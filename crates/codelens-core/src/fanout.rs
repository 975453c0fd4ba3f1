//! Live-update fanout.
//!
//! Broadcasts `FanoutEvent`s to every subscribed dashboard client. Delivery
//! is best-effort: a slow or gone subscriber never blocks or breaks delivery
//! to the others. A fresh subscriber's first message is always a full status
//! snapshot, so it never misses the state that existed before it connected.

use tokio::sync::broadcast;

use crate::types::FanoutEvent;

/// Channel capacity. A lagging subscriber that falls more than this many
/// events behind silently skips ahead rather than blocking the broadcaster;
/// `broadcast::Receiver::recv` reports the lag so callers can log it.
const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts fanout events to subscribers and tracks the latest status
/// snapshot so new subscribers can be caught up immediately.
pub struct Fanout {
    sender: broadcast::Sender<FanoutEvent>,
    latest_snapshot: parking_lot::Mutex<Option<FanoutEvent>>,
}

impl Fanout {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            latest_snapshot: parking_lot::Mutex::new(None),
        }
    }

    /// Subscribe and receive the current status snapshot as the first item,
    /// followed by every subsequent event. Returns `None` for the snapshot
    /// half if none has ever been published (e.g. before the first scan).
    pub fn subscribe(&self) -> (Option<FanoutEvent>, broadcast::Receiver<FanoutEvent>) {
        let snapshot = self.latest_snapshot.lock().clone();
        (snapshot, self.sender.subscribe())
    }

    /// Publish an event to all current subscribers. A send with zero active
    /// subscribers is not an error; the event is simply not delivered to
    /// anyone. If this is a status snapshot, it's remembered for future
    /// subscribers.
    pub fn publish(&self, event: FanoutEvent) {
        if matches!(event, FanoutEvent::StatusSnapshot { .. }) {
            *self.latest_snapshot.lock() = Some(event.clone());
        }
        // A `SendError` just means there are no subscribers right now;
        // best-effort delivery means that's not a failure.
        let _ = self.sender.send(event);
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let fanout = Fanout::new();
        let (snapshot, mut rx) = fanout.subscribe();
        assert!(snapshot.is_none());

        fanout.publish(FanoutEvent::FileChanged {
            path: "src/lib.rs".to_string(),
        });

        let received = rx.recv().await.expect("event delivered");
        match received {
            FanoutEvent::FileChanged { path } => assert_eq!(path, "src/lib.rs"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_latest_snapshot_first() {
        let fanout = Fanout::new();
        fanout.publish(FanoutEvent::StatusSnapshot {
            file_count: 10,
            chunk_count: 42,
            bundle_count: 3,
        });

        let (snapshot, _rx) = fanout.subscribe();
        match snapshot.expect("snapshot present") {
            FanoutEvent::StatusSnapshot { file_count, chunk_count, bundle_count } => {
                assert_eq!((file_count, chunk_count, bundle_count), (10, 42, 3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_does_not_panic() {
        let fanout = Fanout::new();
        fanout.publish(FanoutEvent::BundleSyncStarted { name: "ui".to_string() });
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_one_slow_subscriber_does_not_block_another() {
        let fanout = Fanout::new();
        let (_, mut fast) = fanout.subscribe();
        let (_, _slow_never_polled) = fanout.subscribe();

        fanout.publish(FanoutEvent::FileChanged { path: "a.rs".to_string() });

        let received = fast.recv().await.expect("fast subscriber still receives");
        assert!(matches!(received, FanoutEvent::FileChanged { .. }));
    }
}
