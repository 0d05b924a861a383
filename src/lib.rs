//! Prism wallbox sensor bridge library.
//!
//! This library tracks the sensors a Prism wallbox publishes over MQTT:
//! each topic is decoded into a typed reading and marked unavailable when
//! the wallbox falls silent.

pub mod config;
pub mod error;
pub mod input;
pub mod integration;
pub mod sensors;
