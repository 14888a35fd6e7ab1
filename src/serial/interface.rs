use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{ByteChannel, Result, SerialError, SerialPortInfo, SerialSettings};

/// Serial port opened with the 8E1 framing both sensors expect.
pub struct SerialInterface {
    stream: Option<SerialStream>,
    settings: SerialSettings,
}

impl SerialInterface {
    /// List serial ports visible to the OS
    pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()?;

        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialPortInfo {
                    port_name: port.port_name,
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                _ => SerialPortInfo {
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            })
            .collect())
    }

    /// Open the port described by `settings`
    pub fn open(settings: SerialSettings) -> Result<Self> {
        let stream = tokio_serial::new(settings.port_name.as_str(), settings.baud_rate)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .data_bits(DataBits::Eight)
            .timeout(settings.timeout)
            .open_native_async()
            .map_err(|e| match e.kind() {
                tokio_serial::ErrorKind::NoDevice => SerialError::PortNotFound(settings.port_name.clone()),
                _ => SerialError::ConnectionFailed(format!("{}: {}", settings.port_name, e)),
            })?;

        log::info!(
            "Opened {} at {} baud (8E1, timeout {:?})",
            settings.port_name,
            settings.baud_rate,
            settings.timeout
        );

        Ok(Self {
            stream: Some(stream),
            settings,
        })
    }

    /// Release the port. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::info!("Closed {}", self.settings.port_name);
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn stream_mut(&mut self) -> Result<&mut SerialStream> {
        let name = &self.settings.port_name;
        self.stream
            .as_mut()
            .ok_or_else(|| SerialError::Closed(format!("{} is not open", name)))
    }
}

#[async_trait]
impl ByteChannel for SerialInterface {
    /// Bounded by the port timeout; a device holding off the write
    /// surfaces as `SerialError::Timeout`.
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let window = self.settings.timeout;
        let stream = self.stream_mut()?;
        let write = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        match timeout(window, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SerialError::Timeout),
        }
    }

    async fn read_exact_or_timeout(&mut self, n: usize, window: Duration) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        let deadline = Instant::now() + window;
        let mut buffer = vec![0u8; n];
        let mut total_read = 0;

        while total_read < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, stream.read(&mut buffer[total_read..])).await {
                Err(_) => break,
                Ok(Ok(0)) => return Err(SerialError::Closed("end of stream".to_string())),
                Ok(Ok(bytes_read)) => total_read += bytes_read,
                Ok(Err(ref e)) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(SerialError::IoError(e)),
            }
        }

        buffer.truncate(total_read);
        Ok(buffer)
    }

    async fn read_byte_or_timeout(&mut self, window: Duration) -> Result<Option<u8>> {
        let stream = self.stream_mut()?;
        let mut byte = [0u8; 1];

        match timeout(window, stream.read(&mut byte)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(SerialError::Closed("end of stream".to_string())),
            Ok(Ok(_)) => Ok(Some(byte[0])),
            Ok(Err(ref e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => Err(SerialError::IoError(e)),
        }
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.close();
    }
}
