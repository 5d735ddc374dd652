use crate::broker::{BrokerError, Connector, MessagePublisher};
use crate::config::Config;
use crate::models::{command_topic, CommandPayload};
use crate::service_utils::unique_client_id;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

pub const DEFAULT_COMMAND: &str = "START";
pub const DEFAULT_CHILD_NAME: &str = "Simulated Child";
pub const DELIVERY_GRACE: Duration = Duration::from_secs(2);

/// Fans one command out to every target device.
pub struct CommandSender {
    targets: Vec<String>,
    payload: CommandPayload,
}

impl CommandSender {
    pub fn new(config: &Config, cmd: &str) -> Self {
        Self {
            targets: config.target_devices.clone(),
            payload: CommandPayload {
                cmd: cmd.to_string(),
                child_id: config.child_id,
                parent_id: config.parent_id,
                name: DEFAULT_CHILD_NAME.to_string(),
            },
        }
    }

    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    /// Connects, publishes to each target, waits for delivery and
    /// disconnects. Returns how many publishes the client accepted.
    pub async fn run<C: Connector>(&self, connector: &C) -> Result<usize, BrokerError> {
        let body = serde_json::to_string(&self.payload)?;
        let session = connector.connect(&unique_client_id("dudu-cmd")).await?;

        let mut sent = 0;
        for device_uuid in &self.targets {
            let topic = command_topic(device_uuid);
            info!("Publishing to {}...", topic);
            match session.publish(&topic, &body).await {
                Ok(()) => {
                    sent += 1;
                    info!("Payload sent to {}", device_uuid);
                }
                Err(e) => warn!("Failed to send payload to {}: {}", device_uuid, e),
            }
        }

        sleep(DELIVERY_GRACE).await;
        session.disconnect().await;
        Ok(sent)
    }
}
