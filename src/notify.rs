use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for watch subscriptions, one channel per visit.
/// Every committed event is published here; the wire layer forwards
/// them to watching clients.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a visit. Creates the channel if needed.
    pub fn subscribe(&self, visit_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(visit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is watching.
    pub fn send(&self, visit_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&visit_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a visit is deleted).
    pub fn remove(&self, visit_id: &Ulid) {
        self.channels.remove(visit_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);

        let event = Event::VisitCreated {
            id: vid,
            title: "Tour".into(),
            description: String::new(),
            capacity_per_slot: 10,
        };
        hub.send(vid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        // No subscriber — should not panic
        hub.send(vid, &Event::VisitDeleted { id: vid });
    }
}
