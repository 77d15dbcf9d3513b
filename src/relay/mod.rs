//! Fan-out of inbound transport events to local subscribers.
//!
//! The relay republishes payloads exactly as received: no parsing, filtering
//! or reordering. Each subscriber sees events in transport arrival order.
//! A subscriber that falls more than `capacity` events behind skips the
//! oldest ones; the skip is logged and counted.

use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::metrics::RelayMetrics;
use crate::transport::TransportChannel;

#[derive(Clone)]
pub struct LiveEventRelay {
    sender: broadcast::Sender<Value>,
}

impl LiveEventRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Republish a payload; returns the number of subscribers reached
    pub fn publish(&self, payload: Value) -> usize {
        self.sender.send(payload).unwrap_or(0)
    }

    pub fn subscribe(&self) -> RelaySubscription {
        RelaySubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Forward every `event` received by the channel into this relay
    pub fn attach(&self, channel: &TransportChannel, event: &str) {
        let relay = self.clone();
        let name = event.to_string();
        channel.on(event, move |payload| {
            let reached = relay.publish(payload.clone());
            tracing::trace!(event = %name, subscribers = reached, "Relayed live event");
        });
    }
}

/// Receiving side of the relay
pub struct RelaySubscription {
    receiver: broadcast::Receiver<Value>,
}

impl RelaySubscription {
    /// Next payload, or `None` once the relay is gone
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Relay subscriber lagged, live events lost");
                    RelayMetrics::record_lagged(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Value> {
        let mut subscription = self;
        async_stream::stream! {
            while let Some(payload) = subscription.recv().await {
                yield payload;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::config::SocketConfig;
    use crate::transport::codec::SocketPacket;

    #[tokio::test]
    async fn test_every_subscriber_sees_arrival_order() {
        let relay = LiveEventRelay::new(16);
        let mut a = relay.subscribe();
        let mut b = relay.subscribe();

        assert_eq!(relay.publish(json!({"id": 1})), 2);
        relay.publish(json!({"id": 2}));

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(json!({"id": 1})));
            assert_eq!(sub.recv().await, Some(json!({"id": 2})));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let relay = LiveEventRelay::new(4);
        assert_eq!(relay.publish(json!(null)), 0);
        assert_eq!(relay.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let relay = LiveEventRelay::new(2);
        let mut sub = relay.subscribe();
        for id in 0..5 {
            relay.publish(json!({ "id": id }));
        }

        assert_eq!(sub.recv().await, Some(json!({"id": 3})));
        assert_eq!(sub.recv().await, Some(json!({"id": 4})));
    }

    #[tokio::test]
    async fn test_stream_ends_when_relay_dropped() {
        let relay = LiveEventRelay::new(4);
        let stream = relay.subscribe().into_stream();
        relay.publish(json!("a"));
        relay.publish(json!("b"));
        drop(relay);

        let items: Vec<Value> = stream.collect().await;
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_attach_forwards_channel_events() {
        let channel = TransportChannel::new(SocketConfig::default());
        let relay = LiveEventRelay::new(4);
        relay.attach(&channel, "shipment-update");
        let mut sub = relay.subscribe();

        channel.dispatch(&SocketPacket::event(
            "/notifications",
            "shipment-update",
            json!({"id": 9}),
        ));
        channel.dispatch(&SocketPacket::event("/notifications", "unrelated", json!({"id": 10})));
        channel.dispatch(&SocketPacket::event("/notifications", "shipment-update", json!({})));

        assert_eq!(sub.recv().await, Some(json!({"id": 9})));
        assert_eq!(sub.recv().await, Some(json!({})));
    }
}
