use crate::broker::{BrokerError, Connector, MessagePublisher};
use crate::config::Config;
use crate::models::{
    telemetry_topic, Measurement, SensorType, SimulatedReadings, TelemetryPayload,
};
use crate::service_utils::{unique_client_id, unix_now};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(5);
pub const BATCH_DELIVERY_GRACE: Duration = Duration::from_secs(1);
pub const SPLIT_MERGE_PAUSE: Duration = Duration::from_secs(2);
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload format used by the continuous loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFormat {
    /// Measurement list on the device-scoped telemetry topic.
    Structured,
    /// First-generation flat payload on the shared legacy topic.
    Legacy,
}

pub struct TelemetryPublisher {
    device_uuid: String,
    child_id: i64,
    parent_id: i64,
    legacy_device_uuid: String,
    legacy_topic: String,
    interval: Duration,
}

impl TelemetryPublisher {
    pub fn new(config: &Config) -> Self {
        Self {
            device_uuid: config.device_uuid.clone(),
            child_id: config.child_id,
            parent_id: config.parent_id,
            legacy_device_uuid: config.legacy_device_uuid.clone(),
            legacy_topic: config.legacy_topic.clone(),
            interval: PUBLISH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn topic(&self) -> String {
        telemetry_topic(&self.device_uuid)
    }

    fn payload(&self, ts: i64, battery: Option<u8>, measurements: Vec<Measurement>) -> TelemetryPayload {
        TelemetryPayload {
            device_uuid: self.device_uuid.clone(),
            ts,
            parent_id: Some(self.parent_id),
            child_id: Some(self.child_id),
            battery,
            measurements,
        }
    }

    pub fn random_payload(&self, readings: &SimulatedReadings, ts: i64) -> TelemetryPayload {
        self.payload(ts, Some(readings.battery), readings.measurements())
    }

    /// Fixed full measurement set for scripted backend checks.
    pub fn batch_payload(&self, ts: i64) -> TelemetryPayload {
        self.payload(
            ts,
            Some(85),
            vec![
                Measurement::new(SensorType::Weight, 12.5),
                Measurement::new(SensorType::Height, 85.0),
                Measurement::new(SensorType::Temperature, 36.6),
                Measurement::new(SensorType::HeartRate, 95.0),
                Measurement::new(SensorType::NoiseLevel, 45.0),
            ],
        )
    }

    /// Everything but weight, as reported by the sensor head.
    pub fn sensor_payload(&self, ts: i64) -> TelemetryPayload {
        self.payload(
            ts,
            None,
            vec![
                Measurement::new(SensorType::Height, 110.5),
                Measurement::new(SensorType::Temperature, 36.5),
                Measurement::new(SensorType::HeartRate, 95.0),
                Measurement::new(SensorType::NoiseLevel, 50.2),
            ],
        )
    }

    /// Weight only, as reported by the scale.
    pub fn scale_payload(&self, ts: i64) -> TelemetryPayload {
        self.payload(ts, None, vec![Measurement::new(SensorType::Weight, 20.5)])
    }

    /// Publishes freshly generated readings every interval until `cancel`
    /// fires. Returns the number of successful publishes.
    pub async fn run_continuous<C: Connector>(
        &self,
        connector: &C,
        format: LoopFormat,
        cancel: CancellationToken,
    ) -> Result<u64, BrokerError> {
        let session = connector.connect(&unique_client_id("dudu-sim")).await?;
        let device_uuid = match format {
            LoopFormat::Structured => &self.device_uuid,
            LoopFormat::Legacy => &self.legacy_device_uuid,
        };
        info!("Starting simulation for device: {}", device_uuid);

        let mut rng = StdRng::from_entropy();
        let mut ticker = tokio::time::interval(self.interval);
        let mut published = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let readings = SimulatedReadings::generate(&mut rng);
            let ts = unix_now();
            let (topic, body) = match format {
                LoopFormat::Structured => (
                    self.topic(),
                    serde_json::to_string(&self.random_payload(&readings, ts)),
                ),
                LoopFormat::Legacy => (
                    self.legacy_topic.clone(),
                    serde_json::to_string(&readings.into_legacy(device_uuid, ts)),
                ),
            };
            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to serialize telemetry: {}", e);
                    continue;
                }
            };

            match session.publish(&topic, &body).await {
                Ok(()) => {
                    published += 1;
                    info!("Published to {}: {}", topic, body);
                }
                Err(e) => warn!("Publish to '{}' failed: {}", topic, e),
            }
        }

        session.disconnect().await;
        info!("Simulation for {} ended after {} publishes.", device_uuid, published);
        Ok(published)
    }

    /// One fixed payload, a short grace period for delivery, then disconnect.
    pub async fn run_batch<C: Connector>(&self, connector: &C) -> Result<TelemetryPayload, BrokerError> {
        let session = connector.connect(&unique_client_id("sim")).await?;

        let payload = self.batch_payload(unix_now());
        let topic = self.topic();
        info!("Publishing {} to {}...", payload.sensor_summary(), topic);

        let outcome = match serde_json::to_string(&payload) {
            Ok(body) => session.publish(&topic, &body).await.map(|_| body),
            Err(e) => Err(e.into()),
        };
        match &outcome {
            Ok(body) => info!("Message published successfully: {}", body),
            Err(e) => warn!("Publish error: {}", e),
        }

        sleep(BATCH_DELIVERY_GRACE).await;
        session.disconnect().await;
        outcome.map(|_| payload)
    }

    /// Two short-lived sessions for the same child: sensor readings first,
    /// then the scale's weight with a later timestamp. Each publish is
    /// acknowledged before its session closes.
    pub async fn run_split_merge<C: Connector>(
        &self,
        connector: &C,
    ) -> Result<(TelemetryPayload, TelemetryPayload), BrokerError> {
        info!("--- STARTING SPLIT-MERGE SIMULATION ---");

        let sensor = self.sensor_payload(unix_now());
        info!("[Sensor] Publishing {}...", sensor.sensor_summary());
        self.publish_acknowledged(connector, &format!("{}-Sensor", self.device_uuid), &sensor)
            .await?;
        info!("Sensor Payload Sent.");

        sleep(SPLIT_MERGE_PAUSE).await;

        let scale = self.scale_payload(unix_now().max(sensor.ts) + 1);
        info!("[Scale] Publishing {}...", scale.sensor_summary());
        self.publish_acknowledged(connector, &format!("{}-Scale", self.device_uuid), &scale)
            .await?;
        info!("Scale Payload Sent.");

        info!("--- SENT BOTH. CHECK DB FOR MERGED SESSION ---");
        Ok((sensor, scale))
    }

    async fn publish_acknowledged<C: Connector>(
        &self,
        connector: &C,
        client_id: &str,
        payload: &TelemetryPayload,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_string(payload)?;
        let session = connector.connect(client_id).await?;
        let outcome = session.publish_and_wait(&self.topic(), &body, ACK_TIMEOUT).await;
        session.disconnect().await;
        outcome
    }
}
