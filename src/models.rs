use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every device-scoped topic.
const DEVICE_TOPIC_ROOT: &str = "dudu/v1/dev";

pub fn telemetry_topic(device_uuid: &str) -> String {
    format!("{}/{}/telemetry", DEVICE_TOPIC_ROOT, device_uuid)
}

pub fn command_topic(device_uuid: &str) -> String {
    format!("{}/{}/command", DEVICE_TOPIC_ROOT, device_uuid)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorType {
    Weight,
    Height,
    Temperature,
    HeartRate,
    NoiseLevel,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            SensorType::Weight => "WEIGHT",
            SensorType::Height => "HEIGHT",
            SensorType::Temperature => "TEMPERATURE",
            SensorType::HeartRate => "HEART_RATE",
            SensorType::NoiseLevel => "NOISE_LEVEL",
        };
        f.write_str(tag)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub sensor_type: SensorType,
    pub value: f64,
}

impl Measurement {
    pub fn new(sensor_type: SensorType, value: f64) -> Self {
        Self { sensor_type, value }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub device_uuid: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    pub measurements: Vec<Measurement>,
}

impl TelemetryPayload {
    /// Sensor tags in payload order, e.g. `HEIGHT/TEMPERATURE`.
    pub fn sensor_summary(&self) -> String {
        self.measurements
            .iter()
            .map(|m| m.sensor_type.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub cmd: String,
    pub child_id: i64,
    pub parent_id: i64,
    pub name: String,
}

/// Flat payload of the first-generation simulator, published on a single
/// shared topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LegacyTelemetry {
    pub device_uuid: String,
    pub timestamp: i64,
    pub data: LegacyReadings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LegacyReadings {
    pub weight: f64,
    pub height: f64,
    pub temp: f64,
    pub battery: u8,
}

/// One set of plausible random readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedReadings {
    pub weight: f64,
    pub height: f64,
    pub temperature: f64,
    pub battery: u8,
}

impl SimulatedReadings {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            weight: round_to(rng.gen_range(3.0..=15.0), 2),
            height: round_to(rng.gen_range(45.0..=100.0), 2),
            temperature: round_to(rng.gen_range(36.0..=37.5), 1),
            battery: rng.gen_range(20..=100),
        }
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        vec![
            Measurement::new(SensorType::Weight, self.weight),
            Measurement::new(SensorType::Height, self.height),
            Measurement::new(SensorType::Temperature, self.temperature),
        ]
    }

    pub fn into_legacy(self, device_uuid: &str, timestamp: i64) -> LegacyTelemetry {
        LegacyTelemetry {
            device_uuid: device_uuid.to_string(),
            timestamp,
            data: LegacyReadings {
                weight: self.weight,
                height: self.height,
                temp: self.temperature,
                battery: self.battery,
            },
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
