use crate::sensors::descriptors::DEFAULT_EXPIRE_AFTER_SECS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Parse `KEY=value` lines, skipping blanks and comments.
fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            if !key.is_empty() {
                pairs.push((key, value));
            }
        }
    }

    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub prism: PrismConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrismConfig {
    /// Base topic the wallbox publishes under (e.g. "prism" -> "prism/1/state").
    pub topic_prefix: String,
    /// Silence interval applied to sensors that don't set their own.
    pub default_expire_after_secs: u64,
    /// Optional JSON sensor table replacing the built-in one.
    pub sensor_table: Option<PathBuf>,
}

impl PrismConfig {
    pub fn default_expire_after(&self) -> Duration {
        Duration::from_secs(self.default_expire_after_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "10.0.0.2".to_string(),
                broker_port: 1883,
                client_id: "prism-sensor-bridge".to_string(),
                username: None,
                password: None,
            },
            prism: PrismConfig {
                topic_prefix: "prism".to_string(),
                default_expire_after_secs: DEFAULT_EXPIRE_AFTER_SECS,
                sensor_table: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }

        // Wallbox configuration
        if let Ok(prefix) = std::env::var("PRISM_TOPIC_PREFIX") {
            config.prism.topic_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Ok(secs) = std::env::var("PRISM_EXPIRE_AFTER_SECS")
            && let Ok(s) = secs.parse()
        {
            config.prism.default_expire_after_secs = s;
        }
        if let Ok(path) = std::env::var("PRISM_SENSOR_TABLE") {
            config.prism.sensor_table = Some(PathBuf::from(path));
        }

        config
    }
}
