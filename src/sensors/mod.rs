//! Sensor state management for the wallbox.
//!
//! Each declared sensor is backed by a [`TopicValueTracker`] that listens on
//! one topic, decodes payloads into a [`Reading`] and marks the reading
//! unavailable after a configurable silence interval.
//!
//! All trackers implement the [`Sensor`] trait which provides version tracking
//! for change detection. State changes are pushed to a [`StateSink`] as they
//! happen.

pub mod descriptors;
pub mod expiry;
pub mod notifier;
pub mod reading;
pub mod tracker;

pub use descriptors::{
    SensorDescription, SensorDeviceClass, SensorStateClass, load_sensor_table, prism_sensors,
};
pub use expiry::ExpiryTimer;
pub use notifier::{ChangeNotifier, StateChange};
pub use reading::Reading;
pub use tracker::{TopicValueTracker, TrackerPhase, TrackerSettings, decode_payload};

/// Trait for sensors with change detection.
///
/// The version number is incremented each time the sensor state is written.
/// Consumers compare versions to detect changes without diffing readings.
pub trait Sensor: Send + Sync {
    /// Get the current version number.
    fn version(&self) -> u32;
}

/// Receiver of state-change notifications.
///
/// Called from the tracker's own task after every mutation of value or
/// availability, with the reading as it is after the change.
pub trait StateSink: Send + Sync {
    fn state_changed(&self, key: &str, reading: &Reading);
}

impl<F> StateSink for F
where
    F: Fn(&str, &Reading) + Send + Sync,
{
    fn state_changed(&self, key: &str, reading: &Reading) {
        self(key, reading)
    }
}
