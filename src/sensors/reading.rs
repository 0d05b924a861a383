use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of one sensor as exposed to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reading {
    /// Whether `value` can be trusted right now.
    pub available: bool,
    /// Last decoded value; `None` before the first message or after a
    /// payload that could not be decoded.
    pub value: Option<String>,
    /// When the last message was received.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Reading {
    /// The value parsed as a number, if it is one.
    pub fn numeric(&self) -> Option<f64> {
        self.value.as_deref()?.parse().ok()
    }

    /// Human readable form, e.g. `"231 V"`, `"charging"`, `"unavailable"`.
    ///
    /// Numeric values are rounded to `precision` decimals when given.
    pub fn display(&self, unit: Option<&str>, precision: Option<u8>) -> String {
        if !self.available {
            return "unavailable".to_string();
        }
        let Some(value) = self.value.as_deref() else {
            return "unknown".to_string();
        };

        let text = match (self.numeric(), precision) {
            (Some(n), Some(p)) => format!("{:.*}", p as usize, n),
            _ => value.to_string(),
        };
        match unit {
            Some(u) => format!("{} {}", text, u),
            None => text,
        }
    }
}
