//! # Broadcast Dispatcher
//!
//! Fans an activation out to every open, authorized connection. Delivery is
//! best-effort: the frame is queued on each connection's outbox, and a
//! connection whose session has already gone away is skipped without
//! affecting the others. Outbound volume is never rate limited.

use std::sync::Arc;

use super::registry::ClientRegistry;
use super::tracker::ActivationEvent;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames queued on an open outbox.
    pub delivered: usize,
    /// Connections whose outbox had closed mid-send.
    pub failed: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

/// Broadcasts activations to the registry's authorized connections.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
}

impl Dispatcher {
    /// Fans out to the connections in `registry`.
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Queues the event's notification on every open, authorized outbox.
    pub fn broadcast(&self, event: &ActivationEvent) -> DeliveryReport {
        let text: Arc<str> = event.notification().into();
        let mut report = DeliveryReport::default();

        for subscriber in self.registry.open_authorized() {
            if !subscriber.is_open() {
                continue;
            }
            match subscriber.send_text(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(connection = subscriber.id(), "Delivery failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Broadcasts events in order and sums the per-event reports.
    pub fn broadcast_all(&self, events: &[ActivationEvent]) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for event in events {
            total.merge(self.broadcast(event));
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate_limiter::RateLimiter;
    use crate::core::registry::Outbound;
    use crate::core::tracker::LocationKey;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn event(key: &str) -> ActivationEvent {
        ActivationEvent {
            key: LocationKey::new(key),
            detected_at: Utc::now(),
        }
    }

    fn text(frame: Outbound) -> String {
        match frame {
            Outbound::Text(t) => t.to_string(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_reaches_every_authorized_connection() {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_bad, mut rx_bad) = mpsc::unbounded_channel();
        registry.admit(Some("tok"), tx_a).unwrap();
        registry.admit(Some("tok"), tx_b).unwrap();
        let _ = registry.admit(Some("bad"), tx_bad);
        let dispatcher = Dispatcher::new(registry);

        let report = dispatcher.broadcast(&event("A1"));

        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });
        let expected = "New \u{2694}\u{FE0F} detected at location: A1";
        assert_eq!(text(rx_a.try_recv().unwrap()), expected);
        assert_eq!(text(rx_b.try_recv().unwrap()), expected);
        assert!(rx_bad.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_shares_one_buffer() {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.admit(Some("tok"), tx_a).unwrap();
        registry.admit(Some("tok"), tx_b).unwrap();

        Dispatcher::new(registry).broadcast(&event("C3"));

        match (rx_a.try_recv().unwrap(), rx_b.try_recv().unwrap()) {
            (Outbound::Text(a), Outbound::Text(b)) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("expected two text frames, got {:?}", other),
        }
    }

    #[test]
    fn test_dead_connection_does_not_block_others() {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.admit(Some("tok"), tx_dead).unwrap();
        registry.admit(Some("tok"), tx_live).unwrap();
        drop(rx_dead);
        let dispatcher = Dispatcher::new(registry);

        let report = dispatcher.broadcast(&event("B2"));

        assert_eq!(report.delivered, 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_all_preserves_order() {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.admit(Some("tok"), tx).unwrap();
        let dispatcher = Dispatcher::new(registry);

        let report = dispatcher.broadcast_all(&[event("Z9"), event("A1"), event("M5")]);

        assert_eq!(report.delivered, 3);
        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(text).collect();
        assert!(received[0].ends_with("Z9"));
        assert!(received[1].ends_with("A1"));
        assert!(received[2].ends_with("M5"));
    }

    #[test]
    fn test_broadcast_with_no_subscribers() {
        let registry = Arc::new(ClientRegistry::new("tok", RateLimiter::default()));
        let dispatcher = Dispatcher::new(registry);

        assert_eq!(dispatcher.broadcast(&event("A1")), DeliveryReport::default());
    }
}
