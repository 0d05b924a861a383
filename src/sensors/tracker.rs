//! Per-topic value tracker with staleness expiry.
//!
//! A tracker owns one subscription to one topic. Incoming payloads are
//! decoded into a [`Reading`]; when `expire_after` is non-zero, every
//! message (re)arms a timer and the reading turns unavailable once the
//! topic has been silent that long.
//!
//! While attached, all state mutations happen on a dedicated task (the
//! tracker's home context). The transport may deliver from any thread: it
//! only pushes into the tracker's inbox, and the home task processes
//! messages, timer expiry and shutdown strictly one at a time.
//!
//! ```text
//! Unattached --attach--> AwaitingFirstMessage --message--> Live
//!                                  Live <--message-- Expired
//!                                  Live --expiry--> Expired
//! any --detach--> Unattached (available forced true)
//! ```

use super::expiry::ExpiryTimer;
use super::{Reading, Sensor, StateSink};
use crate::error::{BridgeError, Result};
use crate::input::{Payload, SubscriptionId, Transport};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TrackerPhase {
    Unattached,
    AwaitingFirstMessage,
    Live,
    Expired,
}

/// Immutable per-sensor tracking parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub key: String,
    /// Full topic to subscribe to.
    pub topic: String,
    /// Silence interval; zero disables expiry.
    pub expire_after: Duration,
    /// Labels for enumerated decoding.
    pub options: Option<Vec<String>>,
}

/// Decode a raw payload into a sensor value.
///
/// With `options`, the payload is a 1-based index into the labels; without,
/// it is taken as text. Anything undecodable (not UTF-8, not an integer,
/// index out of range) yields `None`.
pub fn decode_payload(options: Option<&[String]>, payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    match options {
        Some(options) => {
            let index: usize = text.parse().ok()?;
            options.get(index.checked_sub(1)?).cloned()
        }
        None => Some(text.to_string()),
    }
}

struct TrackerState {
    phase: TrackerPhase,
    reading: Reading,
}

/// State readable from anywhere, written only by the owning context.
struct Shared {
    key: String,
    state: RwLock<TrackerState>,
    version: AtomicU32,
    sink: Arc<dyn StateSink>,
}

impl Shared {
    /// Apply a mutation, bump the version and notify the sink.
    fn update(&self, mutate: impl FnOnce(&mut TrackerState)) {
        let reading = {
            let mut state = self.state.write();
            mutate(&mut state);
            state.reading.clone()
        };
        self.version.fetch_add(1, Ordering::SeqCst);
        self.sink.state_changed(&self.key, &reading);
    }
}

struct Attachment {
    subscription: SubscriptionId,
    shutdown: CancellationToken,
    /// Hands the mailbox back when the home task stops.
    home: JoinHandle<mpsc::UnboundedReceiver<Payload>>,
}

/// Tracks the value and availability of one topic.
pub struct TopicValueTracker {
    settings: Arc<TrackerSettings>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    attachment: Option<Attachment>,
}

impl TopicValueTracker {
    pub fn new(
        settings: TrackerSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        let shared = Shared {
            key: settings.key.clone(),
            state: RwLock::new(TrackerState {
                phase: TrackerPhase::Unattached,
                reading: Reading::default(),
            }),
            version: AtomicU32::new(0),
            sink,
        };
        Self {
            settings: Arc::new(settings),
            transport,
            shared: Arc::new(shared),
            attachment: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.settings.key
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Snapshot of the current reading.
    pub fn reading(&self) -> Reading {
        self.shared.state.read().reading.clone()
    }

    pub fn is_available(&self) -> bool {
        self.shared.state.read().reading.available
    }

    pub fn value(&self) -> Option<String> {
        self.shared.state.read().reading.value.clone()
    }

    pub fn phase(&self) -> TrackerPhase {
        self.shared.state.read().phase
    }

    /// Open the subscription and start the home task.
    ///
    /// The reading is reset to unavailable with no value until the first
    /// message arrives. On a transport error the tracker stays unattached.
    pub async fn attach(&mut self) -> Result<()> {
        if self.attachment.is_some() {
            return Err(BridgeError::AlreadyAttached(self.settings.topic.clone()));
        }

        let (inbox, mailbox) = mpsc::unbounded_channel();
        let subscription = self.transport.subscribe(&self.settings.topic, inbox).await?;
        debug!(
            "[Sensor] {} subscribed to {} ({})",
            self.settings.key, self.settings.topic, subscription
        );

        self.shared.update(|state| {
            state.phase = TrackerPhase::AwaitingFirstMessage;
            state.reading.available = false;
            state.reading.value = None;
        });

        let shutdown = CancellationToken::new();
        let home = HomeContext {
            settings: self.settings.clone(),
            shared: self.shared.clone(),
            mailbox,
            shutdown: shutdown.clone(),
            timer: ExpiryTimer::new(),
        };
        let home = tokio::spawn(home.run());

        self.attachment = Some(Attachment {
            subscription,
            shutdown,
            home,
        });
        Ok(())
    }

    /// Stop tracking: cancel pending expiry, mark the reading available and
    /// release the subscription.
    ///
    /// Calling this on a detached tracker does nothing. The subscription
    /// handle is given up even if the transport fails to release it; that
    /// failure is still reported.
    pub async fn detach(&mut self) -> Result<()> {
        let Some(attachment) = self.attachment.take() else {
            return Ok(());
        };

        // Stopping the home task drops its timer with it.
        attachment.shutdown.cancel();
        let mailbox = match attachment.home.await {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                warn!("[Sensor] {} home task ended abnormally: {}", self.settings.key, e);
                None
            }
        };

        self.shared.update(|state| {
            state.phase = TrackerPhase::Unattached;
            state.reading.available = true;
        });

        debug!(
            "[Sensor] {} releasing {} ({})",
            self.settings.key, self.settings.topic, attachment.subscription
        );
        let released = self.transport.unsubscribe(attachment.subscription).await;
        // The inbox must stay open until now, or the transport may prune the
        // route before we release it.
        drop(mailbox);
        released
    }
}

impl Sensor for TopicValueTracker {
    fn version(&self) -> u32 {
        self.shared.version.load(Ordering::SeqCst)
    }
}

impl Drop for TopicValueTracker {
    fn drop(&mut self) {
        // The subscription can't be released without an async context; the
        // transport prunes the route, and releases it upstream if it was the
        // last one, once it sees the inbox closed.
        if let Some(attachment) = self.attachment.take() {
            attachment.shutdown.cancel();
        }
    }
}

/// The task that serialises all state changes of an attached tracker.
struct HomeContext {
    settings: Arc<TrackerSettings>,
    shared: Arc<Shared>,
    mailbox: mpsc::UnboundedReceiver<Payload>,
    shutdown: CancellationToken,
    timer: ExpiryTimer,
}

impl HomeContext {
    async fn run(mut self) -> mpsc::UnboundedReceiver<Payload> {
        let mut mailbox_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                payload = self.mailbox.recv(), if mailbox_open => match payload {
                    Some(payload) => self.on_message(&payload),
                    None => {
                        warn!(
                            "[Sensor] {} transport closed the subscription to {}",
                            self.settings.key, self.settings.topic
                        );
                        mailbox_open = false;
                    }
                },
                _ = self.timer.fired() => self.on_expire(),
            }
        }

        self.timer.cancel();
        self.mailbox
    }

    fn on_message(&mut self, payload: &[u8]) {
        let value = decode_payload(self.settings.options.as_deref(), payload);
        debug!(
            "[Sensor] {} <- {:?} => {:?}",
            self.settings.key,
            String::from_utf8_lossy(payload),
            value
        );
        if value.is_none() {
            debug!(
                "[Sensor] {} could not decode payload, clearing value",
                self.settings.key
            );
        }

        if !self.settings.expire_after.is_zero() {
            self.timer.arm(self.settings.expire_after);
        }

        self.shared.update(|state| {
            if state.phase == TrackerPhase::Expired {
                info!("[Sensor] {} is available again", self.settings.key);
            }
            state.phase = TrackerPhase::Live;
            state.reading.available = true;
            state.reading.value = value;
            state.reading.last_updated = Some(Utc::now());
        });
    }

    fn on_expire(&mut self) {
        info!(
            "[Sensor] {} expired after {:?} without updates",
            self.settings.key, self.settings.expire_after
        );
        self.shared.update(|state| {
            state.phase = TrackerPhase::Expired;
            state.reading.available = false;
        });
    }
}
