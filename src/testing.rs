//! In-memory broker used by the scenario tests.

use crate::broker::{BrokerError, Connector, MessagePublisher};
use rumqttc::ConnectReturnCode;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Connected(String),
    Published { client_id: String, topic: String, payload: String, acked: bool },
    Disconnected(String),
}

#[derive(Clone, Default)]
pub struct RecordingBroker {
    pub records: Arc<Mutex<Vec<Record>>>,
    pub refuse: bool,
}

impl RecordingBroker {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, String, String, bool)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Published { client_id, topic, payload, acked } => {
                    Some((client_id, topic, payload, acked))
                }
                _ => None,
            })
            .collect()
    }
}

pub struct RecordingSession {
    client_id: String,
    records: Arc<Mutex<Vec<Record>>>,
}

impl Connector for RecordingBroker {
    type Session = RecordingSession;

    async fn connect(&self, client_id: &str) -> Result<RecordingSession, BrokerError> {
        if self.refuse {
            return Err(BrokerError::Refused(ConnectReturnCode::ServiceUnavailable));
        }
        self.records
            .lock()
            .unwrap()
            .push(Record::Connected(client_id.to_string()));
        Ok(RecordingSession {
            client_id: client_id.to_string(),
            records: self.records.clone(),
        })
    }
}

impl RecordingSession {
    fn push(&self, topic: &str, payload: &str, acked: bool) {
        self.records.lock().unwrap().push(Record::Published {
            client_id: self.client_id.clone(),
            topic: topic.to_string(),
            payload: payload.to_string(),
            acked,
        });
    }
}

impl MessagePublisher for RecordingSession {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.push(topic, payload, false);
        Ok(())
    }

    async fn publish_and_wait(
        &self,
        topic: &str,
        payload: &str,
        _ack_timeout: Duration,
    ) -> Result<(), BrokerError> {
        self.push(topic, payload, true);
        Ok(())
    }

    async fn disconnect(self) {
        self.records
            .lock()
            .unwrap()
            .push(Record::Disconnected(self.client_id.clone()));
    }
}
