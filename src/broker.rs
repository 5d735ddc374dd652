use crate::config::Config;
use log::{debug, error, info, warn};
use rumqttc::tokio_rustls::rustls::pki_types::CertificateDer;
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, TlsConfiguration, Transport,
};
use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

const REQUEST_CAPACITY: usize = 10;
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection to {host}:{port} failed: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: ConnectionError,
    },
    #[error("Broker refused the connection, return code {0:?}")]
    Refused(ConnectReturnCode),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("No acknowledgment for publish to '{topic}' within {timeout:?}")]
    AckTimeout { topic: String, timeout: Duration },
    #[error("Network worker stopped before the publish was acknowledged")]
    WorkerStopped,
    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything that can put a payload on a topic. Scenario code depends on this
/// rather than on a live connection.
pub trait MessagePublisher {
    /// Fire-and-forget publish at QoS 1.
    fn publish(&self, topic: &str, payload: &str) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Publish at QoS 1 and wait for the broker's acknowledgment of that
    /// packet.
    fn publish_and_wait(
        &self,
        topic: &str,
        payload: &str,
        ack_timeout: Duration,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Close the session and stop its network activity.
    fn disconnect(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

/// Opens sessions against a broker. Each call is a single attempt.
pub trait Connector {
    type Session: MessagePublisher + Send + Sync;

    fn connect(
        &self,
        client_id: &str,
    ) -> impl Future<Output = Result<Self::Session, BrokerError>> + Send;
}

impl Connector for Config {
    type Session = BrokerConnection;

    async fn connect(&self, client_id: &str) -> Result<BrokerConnection, BrokerError> {
        BrokerConnection::connect(self, client_id).await
    }
}

pub async fn mqtt_options(config: &Config, client_id: &str) -> Result<MqttOptions, BrokerError> {
    let mut mqtt_options = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
    mqtt_options.set_keep_alive(config.keep_alive);
    mqtt_options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        mqtt_options.set_credentials(username, password);
    }

    if config.tls_enabled() {
        mqtt_options.set_transport(tls_transport(config).await?);
    }

    Ok(mqtt_options)
}

/// Server certificate verification is always required: against the
/// configured CA bundle, otherwise against the platform store.
async fn tls_transport(config: &Config) -> Result<Transport, BrokerError> {
    if let Some(ca_path) = &config.mqtt_ca_path {
        let ca = fs::read(ca_path).await.map_err(|e| {
            BrokerError::Tls(format!("failed to read MQTT_CA_PATH at {}: {}", ca_path.display(), e))
        })?;
        return Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
    }

    let roots = native_root_store(rustls_native_certs::load_native_certs())?;
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(
        client_config,
    ))))
}

/// Root store from the platform certificates. Unparsable entries are
/// skipped; an empty result is an error.
pub fn native_root_store(
    certs: io::Result<Vec<CertificateDer<'static>>>,
) -> Result<RootCertStore, BrokerError> {
    let certs =
        certs.map_err(|e| BrokerError::Tls(format!("could not load platform certs: {}", e)))?;

    let mut roots = RootCertStore::empty();
    let (added, skipped) = roots.add_parsable_certificates(certs);
    if skipped > 0 {
        warn!("Skipped {} unparsable platform certificates.", skipped);
    }
    if added == 0 {
        return Err(BrokerError::Tls("no usable platform root certificates".to_string()));
    }
    Ok(roots)
}

/// What the network worker reports about QoS 1 publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent(u16),
    Acked(u16),
}

/// An open MQTT session with its network worker running in the background.
pub struct BrokerConnection {
    client: AsyncClient,
    client_id: String,
    deliveries: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    worker: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl BrokerConnection {
    /// Single connection attempt. Returns once the broker has acknowledged
    /// the session; there is no retry.
    pub async fn connect(config: &Config, client_id: &str) -> Result<Self, BrokerError> {
        info!(
            "Connecting to {}:{} as '{}' (tls: {})...",
            config.mqtt_host,
            config.mqtt_port,
            client_id,
            config.tls_enabled()
        );

        let (client, mut eventloop) =
            AsyncClient::new(mqtt_options(config, client_id).await?, REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    if connack.code != ConnectReturnCode::Success {
                        error!("Failed to connect, return code {:?}", connack.code);
                        return Err(BrokerError::Refused(connack.code));
                    }
                    info!("Connected to MQTT broker: {}", config.mqtt_host);
                    break;
                }
                Ok(event) => {
                    debug!("Event before CONNACK: {:?}", event);
                }
                Err(ConnectionError::ConnectionRefused(code)) => {
                    error!("Failed to connect, return code {:?}", code);
                    return Err(BrokerError::Refused(code));
                }
                Err(e) => {
                    error!("Connection failed: {}", e);
                    return Err(BrokerError::Connection {
                        host: config.mqtt_host.clone(),
                        port: config.mqtt_port,
                        source: e,
                    });
                }
            }
        }

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_network_worker(
            eventloop,
            delivery_tx,
            shutdown.clone(),
            client_id.to_string(),
        ));

        Ok(Self {
            client,
            client_id: client_id.to_string(),
            deliveries: Mutex::new(delivery_rx),
            worker: Some(worker),
            shutdown,
        })
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MessagePublisher for BrokerConnection {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    /// The first packet id sent after this call's publish is taken as its
    /// own, so fire-and-forget publishes racing on the same session from
    /// another task are not told apart.
    async fn publish_and_wait(
        &self,
        topic: &str,
        payload: &str,
        ack_timeout: Duration,
    ) -> Result<(), BrokerError> {
        let mut deliveries = self.deliveries.lock().await;
        // Reports for earlier publishes.
        while deliveries.try_recv().is_ok() {}

        self.publish(topic, payload).await?;

        let acknowledged = async {
            let mut own_pkid = None;
            while let Some(delivery) = deliveries.recv().await {
                match (delivery, own_pkid) {
                    (Delivery::Sent(pkid), None) => own_pkid = Some(pkid),
                    (Delivery::Acked(pkid), Some(own)) if pkid == own => return Ok(pkid),
                    (other, _) => debug!("Ignoring {:?} while waiting on '{}'.", other, topic),
                }
            }
            Err(BrokerError::WorkerStopped)
        };

        match timeout(ack_timeout, acknowledged).await {
            Ok(Ok(pkid)) => {
                debug!("Publish to '{}' acknowledged (pkid={}).", topic, pkid);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BrokerError::AckTimeout {
                topic: topic.to_string(),
                timeout: ack_timeout,
            }),
        }
    }

    /// Sends DISCONNECT and stops the network worker.
    async fn disconnect(mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to request disconnect for '{}': {}", self.client_id, e);
        }

        if let Some(mut worker) = self.worker.take() {
            if timeout(WORKER_SHUTDOWN_GRACE, &mut worker).await.is_err() {
                debug!("Network worker for '{}' did not stop in time, cancelling.", self.client_id);
                self.shutdown.cancel();
                let _ = worker.await;
            }
        }
        info!("Disconnected '{}'.", self.client_id);
    }
}

async fn run_network_worker(
    mut eventloop: EventLoop,
    deliveries: mpsc::UnboundedSender<Delivery>,
    shutdown: CancellationToken,
    client_id: String,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("PUBACK <- pkid={}", ack.pkid);
                let _ = deliveries.send(Delivery::Acked(ack.pkid));
            }
            Ok(Event::Incoming(packet)) => {
                debug!("Incoming: {:?}", packet);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT -> '{}'", client_id);
                break;
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                debug!("PUBLISH -> pkid={}", pkid);
                let _ = deliveries.send(Delivery::Sent(pkid));
            }
            Ok(Event::Outgoing(_)) => {
                debug!("Outgoing event.");
            }
            Err(e) => {
                error!("Error in MQTT event loop for '{}': {:?}", client_id, e);
                break;
            }
        }
    }
    debug!("Network worker for '{}' stopped.", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config_from(pairs: Vec<(&'static str, String)>) -> Config {
        Config::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    fn config_with_port(port: u16) -> Config {
        config_from(vec![
            ("MQTT_PORT", port.to_string()),
            ("MQTT_BROKER_HOST", "127.0.0.1".to_string()),
        ])
    }

    #[tokio::test]
    async fn plain_port_has_no_tls_transport() {
        let options = mqtt_options(&config_with_port(1883), "test-client").await.unwrap();
        assert!(matches!(options.transport(), Transport::Tcp));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert_eq!(options.credentials(), None);
    }

    #[tokio::test]
    async fn secure_port_uses_tls_transport() {
        let ca_path = std::env::temp_dir().join(format!("dudu-ca-{}.pem", Uuid::new_v4()));
        fs::write(&ca_path, b"-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n")
            .await
            .unwrap();

        let config = config_from(vec![
            ("MQTT_PORT", "8883".to_string()),
            ("MQTT_CA_PATH", ca_path.display().to_string()),
        ]);
        let options = mqtt_options(&config, "test-client").await.unwrap();
        let _ = fs::remove_file(&ca_path).await;

        match options.transport() {
            Transport::Tls(TlsConfiguration::Simple { ca, .. }) => {
                assert!(ca.starts_with(b"-----BEGIN CERTIFICATE-----"));
            }
            _ => panic!("expected a TLS transport for port 8883"),
        }
    }

    #[tokio::test]
    async fn missing_ca_bundle_is_an_error() {
        let config = config_from(vec![
            ("MQTT_PORT", "8883".to_string()),
            ("MQTT_CA_PATH", "/nonexistent/ca.pem".to_string()),
        ]);
        assert!(matches!(
            mqtt_options(&config, "test-client").await,
            Err(BrokerError::Tls(_))
        ));
        assert!(matches!(
            BrokerConnection::connect(&config, "test-client").await,
            Err(BrokerError::Tls(_))
        ));
    }

    #[test]
    fn unavailable_platform_store_is_an_error() {
        let missing = Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"));
        assert!(matches!(native_root_store(missing), Err(BrokerError::Tls(_))));

        assert!(matches!(native_root_store(Ok(Vec::new())), Err(BrokerError::Tls(_))));

        // A malformed entry is skipped rather than aborting.
        let garbage = vec![CertificateDer::from(vec![0x30, 0x03, 0x01, 0x02, 0x03])];
        assert!(matches!(native_root_store(Ok(garbage)), Err(BrokerError::Tls(_))));
    }

    #[tokio::test]
    async fn credentials_are_passed_through() {
        let config = config_from(vec![
            ("MQTT_USER", "mydudu".to_string()),
            ("MQTT_PASS", "secret".to_string()),
        ]);
        let options = mqtt_options(&config, "test-client").await.unwrap();
        assert_eq!(
            options.credentials(),
            Some(("mydudu".to_string(), "secret".to_string()))
        );
    }

    #[tokio::test]
    async fn refused_port_fails_without_retry() {
        // Port 1 on loopback is not expected to be listening.
        let result = BrokerConnection::connect(&config_with_port(1), "refused-client").await;
        assert!(matches!(result, Err(BrokerError::Connection { port: 1, .. })));
    }
}
