//! MQTT input source for the wallbox broker.
//!
//! Provides the rumqttc-backed [`Transport`](crate::input::Transport) and the
//! topic filter matching shared by all transports.

mod client;
pub mod topic;

pub use client::{MqttEventLoop, MqttTransport};
