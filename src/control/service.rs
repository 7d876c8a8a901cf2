use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::error::{DomainError, DomainResult};
use crate::mqtt::control_topic_for;

/// Outbound transport for command payloads. Implemented by the MQTT link;
/// tests substitute a recording double.
#[async_trait::async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish_json(&self, topic: &str, payload: Vec<u8>) -> DomainResult<()>;
}

/// The two commands a meter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ControlCommand {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl FromStr for ControlCommand {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            other => Err(DomainError::validation(format!(
                "command must be ON or OFF, got: {other:?}"
            ))),
        }
    }
}

/// Wire payload published to `{device_id}/control` at QoS 1.
#[derive(Debug, Serialize)]
struct ControlPayload<'a> {
    command: ControlCommand,
    timestamp: DateTime<Utc>,
    user: &'a str,
}

/// Sends ON/OFF commands to meters. Ownership of the target device is
/// enforced by the API layer before a command reaches this service.
#[derive(Clone)]
pub struct ControlService {
    publisher: Arc<dyn CommandPublisher>,
}

impl ControlService {
    pub fn new(publisher: Arc<dyn CommandPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn send_command(
        &self,
        device_id: &str,
        command: ControlCommand,
        user: &str,
    ) -> DomainResult<()> {
        let payload = ControlPayload { command, timestamp: Utc::now(), user };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| DomainError::Internal(e.into()))?;

        self.publisher
            .publish_json(&control_topic_for(device_id), body)
            .await?;

        info!(device_id = %device_id, command = ?command, user = %user, "Control command sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait::async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish_json(&self, topic: &str, payload: Vec<u8>) -> DomainResult<()> {
            self.sent.lock().unwrap().push((topic.to_owned(), payload));
            Ok(())
        }
    }

    #[test]
    fn command_parses_strictly() {
        assert_eq!("ON".parse::<ControlCommand>().unwrap(), ControlCommand::On);
        assert_eq!("OFF".parse::<ControlCommand>().unwrap(), ControlCommand::Off);
        assert!("on".parse::<ControlCommand>().is_err());
        assert!("TOGGLE".parse::<ControlCommand>().is_err());
    }

    #[tokio::test]
    async fn send_command_publishes_to_device_control_topic() {
        let publisher = Arc::new(RecordingPublisher::default());
        let service = ControlService::new(publisher.clone());

        service.send_command("ESP_01", ControlCommand::On, "alice").await.unwrap();

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (topic, payload) = &sent[0];
        assert_eq!(topic, "ESP_01/control");

        let body: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(body["command"], "ON");
        assert_eq!(body["user"], "alice");
        assert!(body["timestamp"].is_string());
    }
}
