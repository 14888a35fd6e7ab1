pub mod interface;
pub mod mock;

pub use interface::SerialInterface;
pub use mock::ScriptedChannel;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Line settings for one sensor port.
///
/// Parity, stop bits and data bits are fixed by both devices (8E1); only
/// the baud rate and the read window vary per installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialSettings {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// A timeout only means "no data this cycle"; everything else means the
    /// device can no longer be reached through this channel.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SerialError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Byte-oriented request/response link to a single sensor.
///
/// A channel is owned by exactly one poller; none of the methods need to be
/// safe against concurrent use.
#[async_trait]
pub trait ByteChannel: Send {
    /// Write the whole command and flush it to the device.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `n` bytes, stopping early once `timeout` has elapsed.
    /// A short (or empty) result is a timeout, not an error.
    async fn read_exact_or_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Read a single byte, or `None` if nothing arrived within `timeout`.
    async fn read_byte_or_timeout(&mut self, timeout: Duration) -> Result<Option<u8>>;
}

#[async_trait]
impl<C: ByteChannel + ?Sized> ByteChannel for Box<C> {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data).await
    }

    async fn read_exact_or_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_exact_or_timeout(n, timeout).await
    }

    async fn read_byte_or_timeout(&mut self, timeout: Duration) -> Result<Option<u8>> {
        (**self).read_byte_or_timeout(timeout).await
    }
}
