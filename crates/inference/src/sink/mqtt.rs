use super::MessagePublisher;
use crate::config::MqttConfig;
use anyhow::{Context, Result};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Publishes detection results to an MQTT topic.
///
/// The connection is driven by a background thread that reconnects with
/// capped exponential backoff; publishes are queued while disconnected.
pub struct MqttPublisher {
    client: Client,
    topic: String,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    pub fn new(config: &MqttConfig) -> Result<Self> {
        let mut mqtt_options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);

        let (client, mut connection) = Client::new(mqtt_options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = Arc::clone(&connected);

        std::thread::Builder::new()
            .name("mqtt-connection".to_string())
            .spawn(move || {
                let mut reconnect_attempts = 0u32;

                loop {
                    for notification in connection.iter() {
                        match notification {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                connected_clone.store(true, Ordering::Release);
                                reconnect_attempts = 0;
                                tracing::info!("MQTT connected to broker");
                            }
                            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                                tracing::trace!(pkid = ack.pkid, "MQTT publish acknowledged");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                connected_clone.store(false, Ordering::Release);
                                match &e {
                                    ConnectionError::Io(_) | ConnectionError::NetworkTimeout => {
                                        reconnect_attempts = reconnect_attempts.saturating_add(1);
                                        let backoff = calculate_backoff(reconnect_attempts);
                                        tracing::warn!(
                                            error = %e,
                                            attempt = reconnect_attempts,
                                            backoff_ms = backoff.as_millis(),
                                            "MQTT connection lost, reconnecting"
                                        );
                                        std::thread::sleep(backoff);
                                    }
                                    _ => {
                                        tracing::error!(error = %e, "MQTT error");
                                    }
                                }
                            }
                        }
                    }

                    // Iterating again makes rumqttc reconnect
                    connected_clone.store(false, Ordering::Release);
                    reconnect_attempts = reconnect_attempts.saturating_add(1);
                    let backoff = calculate_backoff(reconnect_attempts);
                    tracing::warn!(
                        attempt = reconnect_attempts,
                        backoff_ms = backoff.as_millis(),
                        "MQTT connection closed, attempting reconnect"
                    );
                    std::thread::sleep(backoff);
                }
            })
            .context("Failed to spawn MQTT connection thread")?;

        tracing::info!(
            broker = %format!("{}:{}", config.broker_host, config.broker_port),
            topic = %config.topic,
            "MQTT publisher initialized"
        );

        Ok(Self {
            client,
            topic: config.topic.clone(),
            connected,
        })
    }

    /// Returns true if currently connected to the MQTT broker
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl MessagePublisher for MqttPublisher {
    fn publish(&self, payload: &Value) -> Result<()> {
        let payload = serde_json::to_vec(payload).context("Failed to serialize result message")?;

        if !self.is_connected() {
            tracing::debug!(topic = %self.topic, "MQTT not connected, message queued");
        }

        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .context("Failed to publish MQTT message")?;

        Ok(())
    }
}

/// Calculate exponential backoff with jitter, capped at 30 seconds
fn calculate_backoff(attempt: u32) -> Duration {
    const BASE_MS: u64 = 100;
    const MAX_MS: u64 = 30_000;

    let exp_backoff = BASE_MS.saturating_mul(2u64.saturating_pow(attempt.min(10)));
    let capped = exp_backoff.min(MAX_MS);

    let jitter = (capped / 10).max(1);
    let jittered = capped.saturating_add(fastrand::u64(0..jitter));

    Duration::from_millis(jittered)
}
