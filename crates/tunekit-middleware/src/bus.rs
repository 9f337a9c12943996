//! Broadcast bus for emergency alerts.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so that every subscriber
//! (the CLI, a log sink, a test) receives every [`EmergencyEvent`] and no
//! slow subscriber blocks the cascade that raised it.

use tokio::sync::broadcast;
use tracing::{debug, warn};
use tunekit_types::EmergencyEvent;

/// Default channel capacity (number of buffered alerts before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Shared alert bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct AlertBus {
    sender: broadcast::Sender<EmergencyEvent>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers handed the event.  Having no
    /// subscriber is a normal condition and yields `0`; the event is then
    /// only in the monitor's history.
    pub fn publish(&self, event: EmergencyEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                debug!(event_id = %event.id, "no alert subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> AlertReceiver {
        AlertReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver of emergency alerts.
pub struct AlertReceiver {
    receiver: broadcast::Receiver<EmergencyEvent>,
}

impl AlertReceiver {
    /// Wait for the next alert.
    ///
    /// Returns `None` once the bus has shut down.  Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<EmergencyEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "alert subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<EmergencyEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(source: &str) -> EmergencyEvent {
        EmergencyEvent::new(source, "temperature_c = 95 violates limit", vec![source.to_string()])
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = AlertBus::default();
        let mut rx = bus.subscribe();

        let event = make_event("thermal_sensor");
        assert_eq!(bus.publish(event.clone()), 1);

        let received = rx.recv().await.expect("alert delivered");
        assert_eq!(received.id, event.id);
        assert_eq!(received.affected, event.affected);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_alert() {
        let bus = AlertBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = make_event("psu");
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(rx1.recv().await.map(|e| e.id), Some(event.id));
        assert_eq!(rx2.recv().await.map(|e| e.id), Some(event.id));
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = AlertBus::default();
        assert_eq!(bus.publish(make_event("psu")), 0);
    }

    #[tokio::test]
    async fn closed_bus_ends_stream() {
        let bus = AlertBus::default();
        let mut rx = bus.subscribe();
        drop(bus);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn lagged_subscriber_skips_to_latest() {
        let bus = AlertBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(make_event(&format!("m{i}")));
        }
        let first = rx.try_recv().expect("buffered alert");
        assert_eq!(first.source, "m3");
    }
}
