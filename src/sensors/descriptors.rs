//! Declarative sensor table for the Prism wallbox.
//!
//! Each row names the topic a sensor listens on (relative to the configured
//! prefix), its staleness interval and, for enumerated sensors, the labels a
//! numeric payload indexes into. The remaining fields are display metadata
//! and don't affect tracking.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};

use super::tracker::TrackerSettings;

/// Expiry applied when neither the row nor the configuration sets one.
pub const DEFAULT_EXPIRE_AFTER_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorDeviceClass {
    Enum,
    Voltage,
    Power,
    Current,
    Duration,
    Energy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorStateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescription {
    /// Unique sensor key, e.g. `"output_power"`.
    pub key: String,
    /// Topic relative to the wallbox prefix, e.g. `"1/w"`.
    pub topic: String,
    /// Silence interval in seconds; `0` disables expiry.
    #[serde(default)]
    pub expire_after_secs: Option<u64>,
    /// Labels for enumerated sensors, indexed from 1 by the payload.
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub device_class: Option<SensorDeviceClass>,
    #[serde(default)]
    pub state_class: Option<SensorStateClass>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub display_precision: Option<u8>,
    #[serde(default)]
    pub translation_key: Option<String>,
}

impl SensorDescription {
    pub fn new(key: impl Into<String>, topic: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            translation_key: Some(key.clone()),
            key,
            topic: topic.into(),
            expire_after_secs: None,
            options: None,
            device_class: None,
            state_class: None,
            unit: None,
            display_precision: None,
        }
    }

    /// Enumerated sensor decoding 1-based indices into `options`.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self.device_class = Some(SensorDeviceClass::Enum);
        self
    }

    /// Numeric sensor shown with `unit` and no decimals.
    pub fn with_measurement(
        mut self,
        device_class: SensorDeviceClass,
        state_class: SensorStateClass,
        unit: &str,
    ) -> Self {
        self.device_class = Some(device_class);
        self.state_class = Some(state_class);
        self.unit = Some(unit.to_string());
        self.display_precision = Some(0);
        self
    }

    pub fn with_expire_after(mut self, secs: u64) -> Self {
        self.expire_after_secs = Some(secs);
        self
    }

    /// Effective silence interval, falling back to `default`.
    pub fn expire_after(&self, default: Duration) -> Duration {
        self.expire_after_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Full topic under `prefix`.
    pub fn full_topic(&self, prefix: &str) -> String {
        join_topic(prefix, &self.topic)
    }

    /// Everything a tracker needs to follow this sensor.
    pub fn tracker_settings(
        &self,
        prefix: &str,
        default_expire_after: Duration,
    ) -> TrackerSettings {
        TrackerSettings {
            key: self.key.clone(),
            topic: self.full_topic(prefix),
            expire_after: self.expire_after(default_expire_after),
            options: self.options.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(BridgeError::InvalidSensorTable(
                "sensor key must not be empty".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(BridgeError::InvalidSensorTable(format!(
                "sensor {} has an empty topic",
                self.key
            )));
        }
        if self.topic.contains(['+', '#']) {
            return Err(BridgeError::InvalidSensorTable(format!(
                "sensor {} topic {} must not contain wildcards",
                self.key, self.topic
            )));
        }
        if let Some(options) = &self.options
            && options.is_empty()
        {
            return Err(BridgeError::InvalidSensorTable(format!(
                "sensor {} declares an empty option list",
                self.key
            )));
        }
        if self.device_class == Some(SensorDeviceClass::Enum) && self.options.is_none() {
            return Err(BridgeError::InvalidSensorTable(format!(
                "enum sensor {} has no options",
                self.key
            )));
        }
        Ok(())
    }
}

/// Join a relative topic onto a prefix. An empty prefix leaves it as is.
pub fn join_topic(prefix: &str, topic: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{}/{}", prefix, topic)
    }
}

/// Check a whole table: every row valid and keys unique.
pub fn validate_table(table: &[SensorDescription]) -> Result<()> {
    let mut keys = HashSet::new();
    for description in table {
        description.validate()?;
        if !keys.insert(description.key.as_str()) {
            return Err(BridgeError::InvalidSensorTable(format!(
                "duplicate sensor key {}",
                description.key
            )));
        }
    }
    Ok(())
}

/// Load a sensor table from a JSON array of descriptions.
pub fn load_sensor_table(path: &Path) -> Result<Vec<SensorDescription>> {
    let content = std::fs::read_to_string(path)?;
    parse_sensor_table(&content)
}

pub fn parse_sensor_table(json: &str) -> Result<Vec<SensorDescription>> {
    let table: Vec<SensorDescription> = serde_json::from_str(json)?;
    validate_table(&table)?;
    Ok(table)
}

/// Built-in sensors published by a Prism wallbox.
pub fn prism_sensors() -> Vec<SensorDescription> {
    use SensorDeviceClass::*;
    use SensorStateClass::*;

    vec![
        SensorDescription::new("current_state", "1/state")
            .with_options(["idle", "waiting", "charging", "pause"]),
        SensorDescription::new("power_grid_voltage", "1/volt")
            .with_measurement(Voltage, Measurement, "V"),
        SensorDescription::new("output_power", "1/w").with_measurement(Power, Measurement, "W"),
        SensorDescription::new("output_current", "1/amp")
            .with_measurement(Current, Measurement, "mA"),
        SensorDescription::new("output_car_current", "1/pilot")
            .with_measurement(Current, Measurement, "A"),
        SensorDescription::new("current_set_by_user", "1/user_amp")
            .with_measurement(Current, Measurement, "A"),
        SensorDescription::new("session_time", "1/session_time")
            .with_measurement(Duration, Measurement, "s"),
        SensorDescription::new("session_output_energy", "1/wh")
            .with_measurement(Energy, Total, "Wh"),
        SensorDescription::new("total_output_energy", "1/wh_total")
            .with_measurement(Energy, TotalIncreasing, "Wh"),
        // Device reports "suspended" as 7, not 4; labels are kept as published.
        SensorDescription::new("current_port_mode", "1/mode")
            .with_options(["solar", "normal", "paused", "suspended"]),
        SensorDescription::new("input_grid_power", "energy_data/power_grid")
            .with_measurement(Power, Measurement, "W"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_is_valid() {
        let table = prism_sensors();
        assert_eq!(table.len(), 11);
        validate_table(&table).unwrap();

        let state = &table[0];
        assert_eq!(state.key, "current_state");
        assert_eq!(state.device_class, Some(SensorDeviceClass::Enum));
        assert_eq!(
            state.options.as_deref(),
            Some(&["idle", "waiting", "charging", "pause"].map(String::from)[..])
        );
    }

    #[test]
    fn test_tracker_settings() {
        let description = SensorDescription::new("output_power", "1/w");
        let settings = description.tracker_settings("prism/", Duration::from_secs(600));
        assert_eq!(settings.key, "output_power");
        assert_eq!(settings.topic, "prism/1/w");
        assert_eq!(settings.expire_after, Duration::from_secs(600));
        assert!(settings.options.is_none());

        let settings = description
            .with_expire_after(0)
            .tracker_settings("", Duration::from_secs(600));
        assert_eq!(settings.topic, "1/w");
        assert_eq!(settings.expire_after, Duration::ZERO);
    }

    #[test]
    fn test_parse_sensor_table() {
        let json = r#"[
            {"key": "state", "topic": "1/state", "options": ["idle", "charging"], "device_class": "enum"},
            {"key": "power", "topic": "1/w", "expire_after_secs": 30, "device_class": "power",
             "state_class": "measurement", "unit": "W", "display_precision": 0}
        ]"#;
        let table = parse_sensor_table(json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[1].expire_after_secs, Some(30));
        assert_eq!(table[1].state_class, Some(SensorStateClass::Measurement));
    }

    #[test]
    fn test_rejects_invalid_tables() {
        let duplicate = r#"[{"key": "a", "topic": "1/w"}, {"key": "a", "topic": "1/amp"}]"#;
        assert!(matches!(
            parse_sensor_table(duplicate),
            Err(BridgeError::InvalidSensorTable(_))
        ));

        let empty_options = r#"[{"key": "a", "topic": "1/mode", "options": []}]"#;
        assert!(matches!(
            parse_sensor_table(empty_options),
            Err(BridgeError::InvalidSensorTable(_))
        ));

        let wildcard = r#"[{"key": "a", "topic": "1/#"}]"#;
        assert!(matches!(
            parse_sensor_table(wildcard),
            Err(BridgeError::InvalidSensorTable(_))
        ));

        assert!(matches!(
            parse_sensor_table("{}"),
            Err(BridgeError::SerdeJsonError(_))
        ));
    }

    #[test]
    fn test_class_names() {
        assert_eq!(SensorStateClass::TotalIncreasing.to_string(), "total_increasing");
        assert_eq!(
            "voltage".parse::<SensorDeviceClass>().ok(),
            Some(SensorDeviceClass::Voltage)
        );
    }
}
