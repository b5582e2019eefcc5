//! MQTT backend for the discovery sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use super::Publisher;
use crate::config::MqttConfig;
use crate::error::SinkError;

// Outgoing requests buffered between the client and the event loop.
const REQUEST_CAPACITY: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ---

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    // ---
    /// Create the client. The returned event loop must be driven with
    /// [`MqttPublisher::drive`] for anything to reach the broker.
    pub fn connect(cfg: &MqttConfig) -> (Self, EventLoop) {
        let (client, eventloop) = AsyncClient::new(mqtt_options(cfg), REQUEST_CAPACITY);
        let publisher = Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
        };
        (publisher, eventloop)
    }

    /// True between a broker `CONNACK` and the next connection error.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Poll the connection forever, reconnecting after errors.
    pub async fn drive(self, mut eventloop: EventLoop) {
        // ---
        loop {
            match eventloop.poll().await {
                Ok(event) => self.observe(&event),
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    tracing::warn!("MQTT connection error: {}, retrying in {:?}", e, RECONNECT_DELAY);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn observe(&self, event: &Event) {
        // ---
        tracing::trace!(?event, "mqtt event");
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                if !self.connected.swap(true, Ordering::SeqCst) {
                    tracing::info!("MQTT broker connected");
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), SinkError> {
        // ---
        if !self.is_connected() {
            return Err(SinkError::Disconnected);
        }

        tracing::trace!(topic, retain, "mqtt publish");
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }
}

fn mqtt_options(cfg: &MqttConfig) -> MqttOptions {
    // ---
    let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(30));

    if let Some(user) = &cfg.user {
        options.set_credentials(user, cfg.password.as_deref().unwrap_or_default());
    }

    options
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode};

    fn config(host: &str, port: u16) -> MqttConfig {
        MqttConfig {
            host: host.into(),
            port,
            client_id: "feinstaub-bridge".into(),
            user: Some("bridge".into()),
            password: Some("secret".into()),
            discovery_prefix: "homeassistant".into(),
        }
    }

    #[test]
    fn test_mqtt_options_from_config() {
        // ---
        let options = mqtt_options(&config("broker.local", 1884));

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "feinstaub-bridge");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_publish_refused_until_connack() {
        // ---
        let (publisher, _eventloop) = MqttPublisher::connect(&config("127.0.0.1", 1883));

        let err = publisher
            .publish("ha/sensor/esp8266-42/status", "online".into(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Disconnected));

        publisher.observe(&Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))));
        assert!(publisher.is_connected());
        publisher
            .publish("ha/sensor/esp8266-42/status", "online".into(), true)
            .await
            .unwrap();

        publisher.observe(&Event::Incoming(Packet::Disconnect));
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn test_unreachable_broker_stays_disconnected() {
        // ---
        let (publisher, eventloop) = MqttPublisher::connect(&config("127.0.0.1", 1));
        tokio::spawn(publisher.clone().drive(eventloop));

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = publisher
                .publish("ha/sensor/esp8266-42/state", "{}".into(), true)
                .await;
            assert!(matches!(result, Err(SinkError::Disconnected)));
        }
    }
}
