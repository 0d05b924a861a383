//! MQTT transport backed by rumqttc.

use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use crate::input::{Inbox, RoutingTable, SubscriptionId, Transport};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Broker-facing transport.
///
/// Several local subscriptions may share one broker subscription; the broker
/// is only asked to subscribe on the first and unsubscribe after the last.
pub struct MqttTransport {
    client: AsyncClient,
    routes: Arc<Mutex<RoutingTable>>,
    /// Held across route bookkeeping and the matching broker request, so a
    /// subscriber never reuses a broker subscription that is about to fail.
    broker: tokio::sync::Mutex<()>,
}

/// Connection driver returned alongside [`MqttTransport`].
///
/// Must be run (usually on its own task) for any message to flow.
pub struct MqttEventLoop {
    client: AsyncClient,
    event_loop: EventLoop,
    routes: Arc<Mutex<RoutingTable>>,
}

impl MqttTransport {
    /// Create a new transport from configuration.
    pub fn new(config: &MqttConfig) -> (Self, MqttEventLoop) {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);
        let routes = Arc::new(Mutex::new(RoutingTable::default()));

        let transport = Self {
            client: client.clone(),
            routes: routes.clone(),
            broker: tokio::sync::Mutex::new(()),
        };
        let driver = MqttEventLoop {
            client,
            event_loop,
            routes,
        };
        (transport, driver)
    }

    /// Publish a message to a topic.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .await?;
        Ok(())
    }

    /// Topic filters currently subscribed at the broker.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.routes.lock().filters()
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, topic: &str, inbox: Inbox) -> Result<SubscriptionId> {
        let _broker = self.broker.lock().await;
        let (id, first) = self.routes.lock().insert(topic, inbox);
        if !first {
            debug!("[MQTT] Reusing broker subscription for {}", topic);
            return Ok(id);
        }

        info!("[MQTT] Subscribing to topic: {}", topic);
        if let Err(e) = self.client.subscribe(topic, QoS::AtMostOnce).await {
            self.routes.lock().remove(id);
            return Err(BridgeError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let _broker = self.broker.lock().await;
        let (topic, last) = self
            .routes
            .lock()
            .remove(id)
            .ok_or(BridgeError::UnknownSubscription(id.get()))?;
        if !last {
            return Ok(());
        }

        info!("[MQTT] Unsubscribing from topic: {}", topic);
        self.client
            .unsubscribe(topic.clone())
            .await
            .map_err(|e| BridgeError::Unsubscribe {
                topic,
                reason: e.to_string(),
            })
    }
}

impl MqttEventLoop {
    /// Run the MQTT event loop and route incoming publishes to subscribers.
    ///
    /// This method runs indefinitely. `connected` is signalled on the first
    /// successful connection; every connection (including reconnects)
    /// re-subscribes all routed topics.
    pub async fn run(mut self, mut connected: Option<oneshot::Sender<()>>) {
        info!("[MQTT] Starting event loop");

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "[MQTT] Received {} byte(s) on {}",
                        publish.payload.len(),
                        publish.topic
                    );
                    let (delivered, abandoned) = {
                        let mut routes = self.routes.lock();
                        let abandoned = routes.prune();
                        (routes.dispatch(&publish.topic, &publish.payload), abandoned)
                    };
                    if delivered == 0 {
                        debug!("[MQTT] No subscriber for {}", publish.topic);
                    }
                    self.release(abandoned);
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected to broker");
                    self.resubscribe();
                    if let Some(tx) = connected.take() {
                        let _ = tx.send(());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    // Wait before reconnecting
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Unsubscribe filters whose last subscriber went away without
    /// releasing its subscription.
    fn release(&self, abandoned: Vec<String>) {
        for topic in abandoned {
            info!("[MQTT] Releasing abandoned subscription to {}", topic);
            if let Err(e) = self.client.try_unsubscribe(topic.as_str()) {
                warn!("[MQTT] Failed to unsubscribe from {}: {:?}", topic, e);
            }
        }
    }

    fn resubscribe(&self) {
        for topic in self.routes.lock().filters() {
            // Non-blocking: the request queue is drained by this very loop
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                warn!("[MQTT] Failed to re-subscribe to {}: {:?}", topic, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    fn transport() -> (MqttTransport, MqttEventLoop) {
        MqttTransport::new(&Config::default().mqtt)
    }

    #[tokio::test]
    async fn test_broker_subscription_is_shared() {
        // Requests queue up in the unpolled event loop
        let (transport, _event_loop) = transport();
        let (tx, _rx) = mpsc::unbounded_channel();

        let a = transport.subscribe("prism/1/w", tx.clone()).await.unwrap();
        let b = transport.subscribe("prism/1/w", tx).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(transport.subscribed_topics(), vec!["prism/1/w".to_string()]);

        assert_ok!(transport.unsubscribe(a).await);
        assert_eq!(transport.subscribed_topics(), vec!["prism/1/w".to_string()]);
        assert_ok!(transport.unsubscribe(b).await);
        assert!(transport.subscribed_topics().is_empty());

        let result = transport.unsubscribe(b).await;
        assert!(matches!(result, Err(BridgeError::UnknownSubscription(_))));
    }

    #[tokio::test]
    async fn test_failed_subscribe_rolls_back() {
        let (transport, event_loop) = transport();
        // Without the event loop the client can't queue requests
        drop(event_loop);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = transport.subscribe("prism/1/state", tx).await;
        assert!(matches!(result, Err(BridgeError::Subscribe { .. })));
        assert!(transport.subscribed_topics().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_share_broker_failure() {
        let (transport, event_loop) = transport();
        drop(event_loop);
        let (tx, _rx) = mpsc::unbounded_channel();

        let (a, b) = tokio::join!(
            transport.subscribe("prism/1/state", tx.clone()),
            transport.subscribe("prism/1/state", tx)
        );
        assert_err!(a);
        assert_err!(b);
        assert!(transport.subscribed_topics().is_empty());
    }
}
