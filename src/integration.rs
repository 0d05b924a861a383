//! Wallbox integration orchestrator.
//!
//! Turns a sensor table into one [`TopicValueTracker`] per row and manages
//! their lifecycle as a group, keeping transport and tracker details out of
//! main.rs.

use crate::config::PrismConfig;
use crate::error::Result;
use crate::input::Transport;
use crate::sensors::{Reading, SensorDescription, StateSink, TopicValueTracker};
use log::{info, warn};
use std::sync::Arc;

/// One tracked sensor: its declaration and its live tracker.
pub struct TrackedSensor {
    pub description: SensorDescription,
    pub tracker: TopicValueTracker,
}

pub struct WallboxIntegration {
    sensors: Vec<TrackedSensor>,
}

impl WallboxIntegration {
    /// Build trackers for every row of `table` under the configured prefix.
    pub fn new(
        config: &PrismConfig,
        table: Vec<SensorDescription>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        let default_expire_after = config.default_expire_after();
        let sensors = table
            .into_iter()
            .map(|description| {
                let settings =
                    description.tracker_settings(&config.topic_prefix, default_expire_after);
                let tracker = TopicValueTracker::new(settings, transport.clone(), sink.clone());
                TrackedSensor {
                    description,
                    tracker,
                }
            })
            .collect();
        Self { sensors }
    }

    /// Attach every tracker.
    ///
    /// Stops at the first failure and detaches the trackers attached so far,
    /// so the integration is either fully attached or not at all.
    pub async fn attach_all(&mut self) -> Result<()> {
        for index in 0..self.sensors.len() {
            if let Err(e) = self.sensors[index].tracker.attach().await {
                warn!(
                    "[Sensor] Failed to attach {}: {}",
                    self.sensors[index].description.key, e
                );
                for sensor in &mut self.sensors[..index] {
                    if let Err(e) = sensor.tracker.detach().await {
                        warn!("[Sensor] Rollback of {} failed: {}", sensor.description.key, e);
                    }
                }
                return Err(e);
            }
        }
        info!("[Sensor] Tracking {} sensor(s)", self.sensors.len());
        Ok(())
    }

    /// Detach every tracker, continuing past failures.
    ///
    /// Returns the first error encountered, if any.
    pub async fn detach_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for sensor in &mut self.sensors {
            if let Err(e) = sensor.tracker.detach().await {
                warn!("[Sensor] Failed to detach {}: {}", sensor.description.key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn sensors(&self) -> &[TrackedSensor] {
        &self.sensors
    }

    pub fn sensor(&self, key: &str) -> Option<&TrackedSensor> {
        self.sensors.iter().find(|s| s.description.key == key)
    }

    pub fn tracker(&self, key: &str) -> Option<&TopicValueTracker> {
        self.sensor(key).map(|s| &s.tracker)
    }

    /// Current reading of every sensor, in table order.
    pub fn snapshot(&self) -> Vec<(String, Reading)> {
        self.sensors
            .iter()
            .map(|s| (s.description.key.clone(), s.tracker.reading()))
            .collect()
    }

    /// Display string for a sensor's current reading, with its unit.
    pub fn render(&self, key: &str) -> Option<String> {
        let sensor = self.sensor(key)?;
        let reading = sensor.tracker.reading();
        Some(reading.display(
            sensor.description.unit.as_deref(),
            sensor.description.display_precision,
        ))
    }
}
