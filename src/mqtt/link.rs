//! Link to the external MQTT broker: subscribes to every device's update
//! topic, feeds broker events into the [`MqttEventHandler`], and publishes
//! control commands back out.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{info, warn};

use crate::config::Config;
use crate::control::CommandPublisher;
use crate::error::{DomainError, DomainResult};
use crate::mqtt::MqttEventHandler;

/// Pause between event-loop errors before rumqttc retries the connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Wildcard subscription covering every device's update topic.
const UPDATE_SUBSCRIPTION: &str = "+/update";

/// Cheap-to-clone handle to the broker connection.
#[derive(Debug, Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

impl MqttLink {
    /// Build the broker connection. The returned event loop must be pumped
    /// via [`MqttLink::run`] for anything to flow.
    pub fn new(config: &Config) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        options.set_credentials(config.mqtt_client_id.clone(), config.mqtt_password.clone());
        options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(options, 64);
        (Self { client }, event_loop)
    }

    /// Pump broker events into `handler` indefinitely. Spawn via
    /// `tokio::spawn`; connection loss is logged and retried, never fatal.
    pub async fn run(
        &self,
        mut event_loop: EventLoop,
        handler: Arc<dyn MqttEventHandler>,
    ) {
        info!("MQTT link started");
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(subscription = UPDATE_SUBSCRIPTION, "Broker connected; subscribing");
                    if let Err(e) = self
                        .client
                        .subscribe(UPDATE_SUBSCRIPTION, QoS::AtLeastOnce)
                        .await
                    {
                        warn!(error = %e, "Failed to subscribe to update topics");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // Over a plain subscription the publisher's connection id
                    // is not visible; the per-device topic prefix stands in.
                    let client_id = publish.topic.split('/').next().unwrap_or_default();
                    handler
                        .on_message(client_id, &publish.topic, &publish.payload)
                        .await;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    handler.on_disconnect("broker").await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = RECONNECT_DELAY.as_secs(),
                        "MQTT connection error; retrying"
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl CommandPublisher for MqttLink {
    /// Publish a command payload at QoS 1 (at-least-once).
    async fn publish_json(&self, topic: &str, payload: Vec<u8>) -> DomainResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DomainError::Internal(e.into()))
    }
}
