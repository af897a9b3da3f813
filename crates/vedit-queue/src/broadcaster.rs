//! Per-render fan-out of progress events.
//!
//! Delivery is best-effort and at most once per publish: a subscriber whose
//! buffer is full misses that event, and subscribers that joined after a
//! terminal event never see it (they read the persisted record instead).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use vedit_models::{RenderEvent, RenderId};

/// Default per-subscriber buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Opaque subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving side of one subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub render_id: RenderId,
    rx: mpsc::Receiver<RenderEvent>,
}

impl Subscription {
    /// Next event; `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<RenderEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RenderEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fans out render events to subscribers keyed by render id.
pub struct ProgressBroadcaster {
    subscribers: Mutex<HashMap<RenderId, Vec<(SubscriberId, mpsc::Sender<RenderEvent>)>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl ProgressBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub async fn subscribe(&self, render_id: RenderId) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .lock()
            .await
            .entry(render_id.clone())
            .or_default()
            .push((id, tx));
        debug!(render_id = %render_id, subscriber = id.0, "Subscribed to render");
        Subscription { id, render_id, rx }
    }

    /// Remove one subscriber. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, render_id: &RenderId, subscriber: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let Some(list) = subscribers.get_mut(render_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscriber);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(render_id);
        }
        removed
    }

    /// Deliver `event` to every subscriber of its render id.
    ///
    /// Returns how many subscribers accepted it. Closed subscribers are pruned.
    pub async fn publish(&self, event: RenderEvent) -> usize {
        let render_id = event.render_id().clone();
        let mut subscribers = self.subscribers.lock().await;
        let Some(list) = subscribers.get_mut(&render_id) else {
            return 0;
        };

        let mut delivered = 0;
        list.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(render_id = %render_id, subscriber = id.0, "Subscriber lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            subscribers.remove(&render_id);
        }
        delivered
    }

    pub async fn subscriber_count(&self, render_id: &RenderId) -> usize {
        self.subscribers
            .lock()
            .await
            .get(render_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RenderId {
        RenderId::from(s)
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_scoped_events() {
        let broadcaster = ProgressBroadcaster::default();
        let mut first = broadcaster.subscribe(id("r1")).await;
        let mut second = broadcaster.subscribe(id("r1")).await;
        let mut other = broadcaster.subscribe(id("r2")).await;

        let delivered = broadcaster.publish(RenderEvent::progress(id("r1"), 10)).await;
        assert_eq!(delivered, 2);

        assert!(matches!(first.recv().await, Some(RenderEvent::Progress { progress: 10, .. })));
        assert!(matches!(second.recv().await, Some(RenderEvent::Progress { progress: 10, .. })));
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = ProgressBroadcaster::default();
        let mut sub = broadcaster.subscribe(id("r1")).await;

        assert!(broadcaster.unsubscribe(&id("r1"), sub.id).await);
        assert!(!broadcaster.unsubscribe(&id("r1"), sub.id).await);
        assert_eq!(broadcaster.publish(RenderEvent::complete(id("r1"), "url")).await, 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let broadcaster = ProgressBroadcaster::default();
        let sub = broadcaster.subscribe(id("r1")).await;
        drop(sub);

        assert_eq!(broadcaster.publish(RenderEvent::progress(id("r1"), 1)).await, 0);
        assert_eq!(broadcaster.subscriber_count(&id("r1")).await, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_event_but_keeps_subscriber() {
        let broadcaster = ProgressBroadcaster::new(1);
        let mut sub = broadcaster.subscribe(id("r1")).await;

        assert_eq!(broadcaster.publish(RenderEvent::progress(id("r1"), 1)).await, 1);
        assert_eq!(broadcaster.publish(RenderEvent::progress(id("r1"), 2)).await, 0);
        assert_eq!(broadcaster.subscriber_count(&id("r1")).await, 1);

        assert!(matches!(sub.recv().await, Some(RenderEvent::Progress { progress: 1, .. })));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let broadcaster = ProgressBroadcaster::default();
        broadcaster.publish(RenderEvent::error(id("r1"), "boom")).await;

        let mut late = broadcaster.subscribe(id("r1")).await;
        assert!(late.try_recv().is_none());
    }
}
