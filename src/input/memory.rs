//! In-process publish/subscribe transport.
//!
//! Behaves like a broker that lives inside the process: `publish()` fans a
//! payload out to every matching subscription immediately. Used by the
//! simulation mode and throughout the tests.

use super::{Inbox, RoutingTable, SubscriptionId, Transport};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Default)]
pub struct MemoryTransport {
    routes: Mutex<RoutingTable>,
    /// Topics whose subscribe calls are rejected (failure injection).
    rejected: Mutex<HashSet<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every subscriber whose filter matches `topic`.
    ///
    /// Returns how many subscriptions received it. Subscriptions whose
    /// receiver was dropped are released on the way.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> usize {
        let delivered = {
            let mut routes = self.routes.lock();
            for filter in routes.prune() {
                debug!("[Memory] Released abandoned subscription to {}", filter);
            }
            routes.dispatch(topic, payload.as_ref())
        };
        debug!("[Memory] {} -> {} subscriber(s)", topic, delivered);
        delivered
    }

    /// Number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Distinct topic filters currently subscribed.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.routes.lock().filters()
    }

    /// Make every future subscribe call on `topic` fail.
    pub fn reject_topic(&self, topic: impl Into<String>) {
        self.rejected.lock().insert(topic.into());
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, topic: &str, inbox: Inbox) -> Result<SubscriptionId> {
        if self.rejected.lock().contains(topic) {
            return Err(BridgeError::Subscribe {
                topic: topic.to_string(),
                reason: "rejected by transport".to_string(),
            });
        }
        let (id, _) = self.routes.lock().insert(topic, inbox);
        debug!("[Memory] Subscribed {} to {}", id, topic);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        match self.routes.lock().remove(id) {
            Some((topic, _)) => {
                debug!("[Memory] Unsubscribed {} from {}", id, topic);
                Ok(())
            }
            None => Err(BridgeError::UnknownSubscription(id.get())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = transport.subscribe("prism/1/volt", tx).await.unwrap();
        assert_eq!(transport.subscription_count(), 1);

        assert_eq!(transport.publish("prism/1/volt", "229"), 1);
        assert_eq!(rx.recv().await, Some(b"229".to_vec()));

        transport.unsubscribe(id).await.unwrap();
        assert_eq!(transport.publish("prism/1/volt", "230"), 0);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id_fails() {
        let transport = MemoryTransport::new();
        let result = transport.unsubscribe(SubscriptionId(42)).await;
        assert!(matches!(result, Err(BridgeError::UnknownSubscription(42))));
    }

    #[tokio::test]
    async fn test_publish_releases_abandoned_subscription() {
        let transport = MemoryTransport::new();
        let (tx, rx) = mpsc::unbounded_channel();
        transport.subscribe("prism/1/w", tx).await.unwrap();
        drop(rx);

        assert_eq!(transport.publish("prism/1/w", "11000"), 0);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_topic() {
        let transport = MemoryTransport::new();
        transport.reject_topic("prism/1/mode");
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = transport.subscribe("prism/1/mode", tx).await;
        assert!(matches!(result, Err(BridgeError::Subscribe { .. })));
        assert_eq!(transport.subscription_count(), 0);
    }
}
