use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;

use super::{PublishError, PublishMessage, Publisher, Result};

/// Outstanding requests buffered between the client and its event loop
const REQUEST_CAPACITY: usize = 100;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on flushing queued messages at shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Publishes with QoS 1, not retained.
pub struct MqttPublisher {
    client: AsyncClient,
    event_task: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Create the client and start driving its event loop.
    ///
    /// The connection itself is established (and re-established) by the
    /// event loop in the background; messages published before the broker
    /// answers are queued.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        if settings.host.is_empty() {
            return Err(PublishError::ConnectionFailed("empty broker host".to_string()));
        }

        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let endpoint = format!("{}:{}", settings.host, settings.port);
        let closing = Arc::new(AtomicBool::new(false));
        let event_task = tokio::spawn(drive_event_loop(event_loop, endpoint, closing.clone()));

        log::info!(
            "MQTT client '{}' connecting to {}:{}",
            settings.client_id,
            settings.host,
            settings.port
        );

        Ok(Self {
            client,
            event_task,
            closing,
        })
    }
}

/// Poll the connection until the disconnect request has gone out, or until
/// the connection fails after `close` was requested.
async fn drive_event_loop(mut event_loop: EventLoop, endpoint: String, closing: Arc<AtomicBool>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("Connected to broker {}", endpoint);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                log::info!("Broker {} closed the session", endpoint);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!("Disconnect sent to {}", endpoint);
                return;
            }
            Ok(_) => {}
            Err(e) if closing.load(Ordering::Acquire) => {
                log::warn!("MQTT connection to {} lost while closing: {}", endpoint, e);
                return;
            }
            Err(e) => {
                log::warn!("MQTT connection to {} failed: {}", endpoint, e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&mut self, message: PublishMessage) -> Result<()> {
        log::debug!("{} <- {}", message.topic, message.payload);
        self.client
            .publish(message.topic, QoS::AtLeastOnce, false, message.payload.into_bytes())
            .await
            .map_err(|e| PublishError::Client(e.to_string()))
    }

    /// Queue a disconnect behind any pending publishes and let the event
    /// loop flush them, up to `CLOSE_TIMEOUT`.
    async fn close(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::Release);

        let flush = async {
            if let Err(e) = self.client.disconnect().await {
                log::warn!("MQTT disconnect failed: {}", e);
            }
            (&mut self.event_task).await
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, flush).await {
            Ok(_) => log::info!("Disconnected from broker"),
            Err(_) => {
                log::warn!(
                    "Broker did not take the disconnect within {:?}, queued messages dropped",
                    CLOSE_TIMEOUT
                );
                self.event_task.abort();
            }
        }
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}
