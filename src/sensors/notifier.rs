//! Channel-backed state change notifier.
//!
//! When a tracker's reading changes, the change is forwarded to whoever
//! renders or persists sensor state (the daemon's logger, tests, ...).

use super::{Reading, StateSink};
use log::trace;
use tokio::sync::mpsc;

/// One state change emitted by a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub key: String,
    pub reading: Reading,
}

/// Forwards every notification into an unbounded channel.
///
/// This is a non-blocking operation, so it is safe to call from the
/// trackers' tasks. Notifications sent after the receiver is dropped are
/// discarded.
///
/// # Usage
/// ```ignore
/// let (notifier, mut changes) = ChangeNotifier::channel();
/// let tracker = TopicValueTracker::new(settings, transport, Arc::new(notifier));
/// while let Some(change) = changes.recv().await { /* render */ }
/// ```
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::UnboundedSender<StateChange>,
}

impl ChangeNotifier {
    /// Create a notifier together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateSink for ChangeNotifier {
    fn state_changed(&self, key: &str, reading: &Reading) {
        let change = StateChange {
            key: key.to_string(),
            reading: reading.clone(),
        };
        if self.tx.send(change).is_err() {
            trace!("[Sensor] Dropping change for {}: receiver closed", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_changes() {
        let (notifier, mut rx) = ChangeNotifier::channel();
        let reading = Reading {
            available: true,
            value: Some("230".to_string()),
            last_updated: None,
        };

        notifier.state_changed("power_grid_voltage", &reading);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "power_grid_voltage");
        assert_eq!(change.reading, reading);
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (notifier, rx) = ChangeNotifier::channel();
        drop(rx);
        notifier.state_changed("output_power", &Reading::default());
    }
}
