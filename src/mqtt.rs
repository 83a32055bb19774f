//! MQTT transport
//!
//! One rumqttc client per process carries everything: retained state JSON,
//! retained notification messages, Home Assistant discovery payloads and
//! the availability topic (with a matching last-will). Incoming command
//! payloads are fanned into an mpsc channel the driver drains.

use crate::config::MqttConfig;
use crate::error::Result;
use crate::logging::get_logger;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Severity of a notification event, lowest number = most important.
///
/// A notification is published only when the configured notify level is at
/// least as high as its own level, so level 1 messages always go out and
/// level 3 messages only under verbose configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Alert = 1,
    Warning = 2,
    Debug = 3,
}

impl NotifyLevel {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// One message for the per-device notification topic
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotifyLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// An inbound publish forwarded to the driver
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Shared MQTT client with reconnect handling
pub struct MqttService {
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<String>>>,
    logger: crate::logging::StructuredLogger,
}

impl MqttService {
    /// Connect to the broker and spawn the event loop.
    ///
    /// The last will marks the availability topic offline; the online
    /// payload is republished on every (re)connack so a broker restart
    /// flips the bridge back to available without driver involvement.
    pub async fn connect(
        config: &MqttConfig,
        client_id: &str,
        availability_topic: &str,
    ) -> Result<(Self, mpsc::Receiver<IncomingMessage>)> {
        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }
        options.set_last_will(LastWill::new(
            availability_topic,
            config.availability_offline.clone(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let (tx, rx) = mpsc::channel(32);

        let service = Self {
            client: client.clone(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            logger: get_logger("mqtt"),
        };

        let subscriptions = Arc::clone(&service.subscriptions);
        let availability_topic = availability_topic.to_string();
        let online_payload = config.availability_online.clone();
        let logger = get_logger("mqtt-events");
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = IncomingMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if tx.send(message).await.is_err() {
                            // Driver is gone, stop the loop
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        logger.info("Connected to MQTT broker");
                        let _ = client
                            .publish(
                                &availability_topic,
                                QoS::AtLeastOnce,
                                true,
                                online_payload.clone(),
                            )
                            .await;
                        for topic in subscriptions.lock().await.iter() {
                            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                                logger.error(&format!("Resubscribe to {} failed: {}", topic, e));
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        logger.warn(&format!("MQTT connection error: {}, retrying", e));
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok((service, rx))
    }

    /// Subscribe and remember the topic for resubscription after reconnect
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().await.push(topic.to_string());
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        self.logger.debug(&format!("Subscribed to {}", topic));
        Ok(())
    }

    /// Publish a retained JSON document
    pub async fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await?;
        Ok(())
    }

    /// Publish a retained plain-text payload
    pub async fn publish_retained(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload.to_string())
            .await?;
        Ok(())
    }

    /// Publish a notification, gated by the configured notify level
    pub async fn notify(
        &self,
        topic: &str,
        notification: &Notification,
        configured_level: u8,
    ) -> Result<()> {
        self.logger.info(&notification.message);
        if configured_level >= notification.level.rank() {
            self.publish_retained(topic, &notification.message).await?;
        }
        Ok(())
    }

    /// Best-effort notify used on shutdown paths where a publish failure
    /// must not mask the original error
    pub async fn notify_lossy(&self, topic: &str, notification: &Notification, configured_level: u8) {
        if let Err(e) = self.notify(topic, notification, configured_level).await {
            self.logger
                .error(&format!("Failed to publish notification: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_level_ranks() {
        assert_eq!(NotifyLevel::Alert.rank(), 1);
        assert_eq!(NotifyLevel::Warning.rank(), 2);
        assert_eq!(NotifyLevel::Debug.rank(), 3);
    }

    #[test]
    fn test_notification_constructor() {
        let n = Notification::new(NotifyLevel::Alert, "water lock engaged");
        assert_eq!(n.level, NotifyLevel::Alert);
        assert_eq!(n.message, "water lock engaged");
    }
}
