//! Telemetry and command simulators for devices speaking the `dudu/v1` MQTT
//! topic scheme.

pub mod broker;
pub mod command;
pub mod config;
pub mod models;
pub mod service_utils;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
