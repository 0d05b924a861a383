//! Input sources feeding payloads to sensor trackers.
//!
//! Every source implements [`Transport`], the pub/sub capability a tracker
//! needs: open a subscription that pushes payloads into an [`Inbox`], and
//! release it again. Delivery may happen on any thread; trackers drain their
//! inbox on their own task.
//!
//! Current input sources:
//! - `mqtt`: rumqttc-backed broker connection
//! - `memory`: in-process pub/sub for simulation and tests
//! - `simulation`: generated wallbox readings

pub mod memory;
pub mod mqtt;
pub mod simulation;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryTransport;

/// Raw message body, treated as untrusted bytes.
pub type Payload = Vec<u8>;

/// Sending half handed to a transport when subscribing.
pub type Inbox = mpsc::UnboundedSender<Payload>;

/// Opaque handle to one open subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Publish/subscribe capability consumed by sensor trackers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start delivering payloads published on `topic` into `inbox`.
    async fn subscribe(&self, topic: &str, inbox: Inbox) -> Result<SubscriptionId>;

    /// Stop delivering for a subscription returned by [`Transport::subscribe`].
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Subscription bookkeeping shared by transports.
///
/// Tracks which inboxes listen on which topic filters and fans out payloads.
#[derive(Default)]
pub(crate) struct RoutingTable {
    next_id: u64,
    routes: Vec<Route>,
}

struct Route {
    id: SubscriptionId,
    filter: String,
    inbox: Inbox,
}

impl RoutingTable {
    /// Register an inbox. Returns the id and whether the filter is new.
    pub(crate) fn insert(&mut self, filter: &str, inbox: Inbox) -> (SubscriptionId, bool) {
        let first = !self.routes.iter().any(|r| r.filter == filter);
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.routes.push(Route {
            id,
            filter: filter.to_string(),
            inbox,
        });
        (id, first)
    }

    /// Remove a route. Returns its filter and whether it was the last one on it.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<(String, bool)> {
        let pos = self.routes.iter().position(|r| r.id == id)?;
        let route = self.routes.remove(pos);
        let last = !self.routes.iter().any(|r| r.filter == route.filter);
        Some((route.filter, last))
    }

    /// Distinct filters with at least one route.
    pub(crate) fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.routes.iter().map(|r| r.filter.clone()).collect();
        filters.sort();
        filters.dedup();
        filters
    }

    /// Drop routes whose inbox has been closed by its owner going away.
    ///
    /// Returns the filters left without any route, which the transport
    /// should release upstream.
    pub(crate) fn prune(&mut self) -> Vec<String> {
        let before = self.filters();
        self.routes.retain(|r| !r.inbox.is_closed());
        let after = self.filters();
        before.into_iter().filter(|f| !after.contains(f)).collect()
    }

    /// Deliver a payload to every route whose filter matches. Returns the count.
    pub(crate) fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for route in &self.routes {
            if mqtt::topic::matches(&route.filter, topic)
                && route.inbox.send(payload.to_vec()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}
