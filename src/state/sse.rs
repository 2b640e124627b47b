use tokio::sync::broadcast;
use tracing::trace;

use crate::dto::sse::ServerEvent;

/// Fan-out point for events pushed to SSE subscribers.
///
/// Slow subscribers lag and lose the oldest events once `capacity` is exceeded.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Hub buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver `event` to current subscribers. Returns how many received it.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let name = event.event.clone();
        match self.sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                trace!(event = name.as_deref(), "no SSE subscriber for event");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> ServerEvent {
        ServerEvent::json(Some(name.to_string()), &()).unwrap()
    }

    #[test]
    fn broadcast_without_subscribers_is_dropped() {
        let hub = SseHub::new(4);
        assert_eq!(hub.broadcast(event("status")), 0);
    }

    #[test]
    fn every_subscriber_receives_events() {
        let hub = SseHub::new(4);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        assert_eq!(hub.broadcast(event("session.started")), 2);
        assert_eq!(
            first.try_recv().unwrap().event.as_deref(),
            Some("session.started")
        );
        assert!(second.try_recv().is_ok());
    }
}
