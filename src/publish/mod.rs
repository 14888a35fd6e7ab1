pub mod mqtt;

pub use mqtt::{MqttPublisher, MqttSettings};

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// One outbound message, already rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: String,
}

impl PublishMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Mount point of an RFID reader on the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderPosition {
    Travel,
    Front,
    Back,
}

impl ReaderPosition {
    pub const ALL: [ReaderPosition; 3] = [
        ReaderPosition::Travel,
        ReaderPosition::Front,
        ReaderPosition::Back,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderPosition::Travel => "travel",
            ReaderPosition::Front => "front",
            ReaderPosition::Back => "back",
        }
    }
}

impl fmt::Display for ReaderPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReaderPosition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "travel" => Ok(ReaderPosition::Travel),
            "front" => Ok(ReaderPosition::Front),
            "back" => Ok(ReaderPosition::Back),
            other => Err(format!("unknown reader position: {}", other)),
        }
    }
}

/// `rfid/{machine_id}/{position}`
pub fn rfid_topic(machine_id: &str, position: ReaderPosition) -> String {
    format!("rfid/{}/{}", machine_id, position)
}

/// `pgv/{machine_id}`
pub fn pgv_topic(machine_id: &str) -> String {
    format!("pgv/{}", machine_id)
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publish channel closed")]
    Closed,

    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Outbound sink for decoded sensor data
#[async_trait]
pub trait Publisher: Send {
    async fn publish(&mut self, message: PublishMessage) -> Result<()>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Box<P> {
    async fn publish(&mut self, message: PublishMessage) -> Result<()> {
        (**self).publish(message).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Writes every message to the log instead of a broker
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&mut self, message: PublishMessage) -> Result<()> {
        log::info!("{} <- {}", message.topic, message.payload);
        Ok(())
    }
}

/// Keeps messages in memory; handy for tests and diagnostics
#[derive(Debug, Default, Clone)]
pub struct CollectingPublisher {
    messages: Arc<Mutex<Vec<PublishMessage>>>,
}

impl CollectingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Publisher for CollectingPublisher {
    async fn publish(&mut self, message: PublishMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
        Ok(())
    }
}

/// Queue `message` for the publisher, waiting at most `wait` for room.
///
/// Returns `Ok(false)` when the queue stayed full and the message was
/// dropped, so a stalled publisher never holds a poll loop past one cycle.
pub async fn hand_off(
    sink: &mpsc::Sender<PublishMessage>,
    message: PublishMessage,
    wait: Duration,
) -> Result<bool> {
    match sink.send_timeout(message, wait).await {
        Ok(()) => Ok(true),
        Err(SendTimeoutError::Timeout(dropped)) => {
            log::warn!("Publisher backlog full, dropping message for {}", dropped.topic);
            Ok(false)
        }
        Err(SendTimeoutError::Closed(_)) => Err(PublishError::Closed),
    }
}

/// Drain the poller handoff channel into `publisher` until every sender is
/// gone, then close the publisher.
///
/// A failed publish is logged and the message dropped; the next poll cycle
/// produces a fresh one anyway. Only a closed sink stops the loop.
pub async fn forward<P>(mut rx: mpsc::Receiver<PublishMessage>, mut publisher: P) -> Result<u64>
where
    P: Publisher,
{
    let mut published = 0u64;

    while let Some(message) = rx.recv().await {
        match publisher.publish(message).await {
            Ok(()) => published += 1,
            Err(PublishError::Closed) => {
                log::error!("Publisher closed, dropping remaining messages");
                rx.close();
                return Err(PublishError::Closed);
            }
            Err(e) => log::warn!("{}", e),
        }
    }

    publisher.close().await?;
    log::info!("Publisher drained ({} message(s) sent)", published);
    Ok(published)
}
