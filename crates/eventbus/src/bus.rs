//! In-process event bus: a pull side that accepts published events and a
//! pub side that subscribers read from, tag-prefix filtered.
//!
//! Built on [`tokio::sync::broadcast`], whose bounded-ring-buffer semantics
//! already give us the delivery contract we need: publication order is
//! preserved per-publisher (the channel is a single FIFO ring), and a
//! subscriber that falls behind has its oldest unread events silently
//! dropped (`RecvError::Lagged`) rather than blocking the publisher or
//! other subscribers.

use saltcore_wire::message::EventMessage;
use tokio::sync::broadcast;

use crate::filter::tag_matches;

/// Shared event bus. Cheap to clone (an `Arc`-backed sender internally).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventMessage>,
}

impl EventBus {
    /// `backlog` bounds how many unread events a lagging subscriber may
    /// accumulate before the oldest are dropped.
    pub fn new(backlog: usize) -> Self {
        let (tx, _rx) = broadcast::channel(backlog.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers it was handed to
    /// (a lagging or absent subscriber set does not make this an error —
    /// delivery is best-effort).
    pub fn publish(&self, event: EventMessage) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe with a tag-prefix filter. An empty prefix subscribes to
    /// everything.
    pub fn subscribe(&self, tag_prefix: impl Into<String>) -> Subscription {
        Subscription { rx: self.tx.subscribe(), tag_prefix: tag_prefix.into() }
    }
}

/// A filtered view onto the bus. Call [`Subscription::recv`] in a loop.
pub struct Subscription {
    rx: broadcast::Receiver<EventMessage>,
    tag_prefix: String,
}

impl Subscription {
    /// Wait for the next event matching this subscription's tag prefix.
    /// Returns `None` once the bus itself has been dropped.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.recv().await {
                Ok(event) if tag_matches(&event.tag, &self.tag_prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, prefix = %self.tag_prefix, "event bus subscriber lagged, dropping oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tag: &str) -> EventMessage {
        EventMessage { tag: tag.to_string(), data: serde_json::json!({}), ts: 0 }
    }

    #[tokio::test]
    async fn delivers_matching_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("salt/job");
        bus.publish(event("salt/job/1/new"));
        bus.publish(event("unrelated"));
        bus.publish(event("salt/job/1/ret"));

        assert_eq!(sub.recv().await.expect("first").tag, "salt/job/1/new");
        assert_eq!(sub.recv().await.expect("second").tag, "salt/job/1/ret");
    }

    #[tokio::test]
    async fn empty_prefix_subscribes_to_everything() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("");
        bus.publish(event("anything/at/all"));
        assert_eq!(sub.recv().await.expect("event").tag, "anything/at/all");
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_instead_of_blocking_publisher() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe("");
        for i in 0..10 {
            bus.publish(event(&format!("t{i}")));
        }
        // The subscriber lagged; it should recover and keep receiving
        // without the publish loop above ever having blocked.
        let recovered = sub.recv().await;
        assert!(recovered.is_some());
    }

    #[tokio::test]
    async fn returns_none_once_bus_is_dropped() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe("");
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
