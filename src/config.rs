use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BROKER_HOST: &str = "broker.hivemq.com";
pub const DEFAULT_PLAIN_PORT: u16 = 1883;
pub const TLS_PORT: u16 = 8883;
pub const DEFAULT_LEGACY_TOPIC: &str = "mydudu/telemetry";
pub const DEFAULT_DEVICE_UUID: &str = "MD-0001";
pub const DEFAULT_LEGACY_DEVICE_UUID: &str = "simulated-device-001";
pub const DEFAULT_TARGET_DEVICES: &str = "MD-0001,MDX-0001";
const DEFAULT_CHILD_ID: i64 = 3;
const DEFAULT_PARENT_ID: i64 = 5;
const KEEP_ALIVE_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// PEM bundle to trust instead of the platform store.
    pub mqtt_ca_path: Option<PathBuf>,
    pub keep_alive: Duration,

    pub legacy_topic: String,
    pub device_uuid: String,
    /// Device id for the flat legacy payload; `DEVICE_UUID` when set.
    pub legacy_device_uuid: String,
    pub child_id: i64,
    pub parent_id: i64,
    pub target_devices: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing or invalid.")]
    MissingOrInvalid(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl Config {
    /// Transport security is tied to the well-known secure MQTT port.
    pub fn tls_enabled(&self) -> bool {
        self.mqtt_port == TLS_PORT
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load environment variables from .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mqtt_host = read("MQTT_BROKER_HOST")
            .or_else(|| read("MQTT_BROKER"))
            .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string());

        let mqtt_port = match read("MQTT_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::ParsingError("MQTT_PORT must be a valid number".to_string()))?,
            None => DEFAULT_PLAIN_PORT,
        };
        if mqtt_port == 0 {
            return Err(ConfigError::MissingOrInvalid("MQTT_PORT".to_string()));
        }

        let mqtt_username = read("MQTT_USER");
        let mqtt_password = read("MQTT_PASS");
        match (&mqtt_username, &mqtt_password) {
            (Some(_), None) => return Err(ConfigError::MissingOrInvalid("MQTT_PASS".to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingOrInvalid("MQTT_USER".to_string())),
            _ => {}
        }

        let parse_id = |key: &str, default: i64| match read(key) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ConfigError::ParsingError(format!("{} must be an integer", key))),
            None => Ok(default),
        };

        let target_devices: Vec<String> = read("DUDU_TARGET_DEVICES")
            .unwrap_or_else(|| DEFAULT_TARGET_DEVICES.to_string())
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
        if target_devices.is_empty() {
            return Err(ConfigError::MissingOrInvalid("DUDU_TARGET_DEVICES".to_string()));
        }

        let device_uuid = read("DEVICE_UUID");

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_ca_path: read("MQTT_CA_PATH").map(PathBuf::from),
            keep_alive: Duration::from_secs(KEEP_ALIVE_SECS),

            legacy_topic: read("MQTT_TOPIC").unwrap_or_else(|| DEFAULT_LEGACY_TOPIC.to_string()),
            legacy_device_uuid: device_uuid
                .clone()
                .unwrap_or_else(|| DEFAULT_LEGACY_DEVICE_UUID.to_string()),
            device_uuid: device_uuid.unwrap_or_else(|| DEFAULT_DEVICE_UUID.to_string()),
            child_id: parse_id("DUDU_CHILD_ID", DEFAULT_CHILD_ID)?,
            parent_id: parse_id("DUDU_PARENT_ID", DEFAULT_PARENT_ID)?,
            target_devices,
        })
    }
}
