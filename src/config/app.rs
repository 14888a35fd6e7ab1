use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::DEFAULT_MAX_FRAME_LEN;
use crate::pgv::{self, PgvDecoder};
use crate::publish::{MqttSettings, ReaderPosition};
use crate::rfid::{self, RfidDecoder, TagLayout};
use crate::serial::{SerialSettings, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

const DEFAULT_MACHINE_ID: &str = "machine1";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
/// Smallest frame that can hold both markers
const MIN_FRAME_LEN: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_machine_id() -> String {
    DEFAULT_MACHINE_ID.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

/// Deployment configuration, read from `config.json`.
///
/// Key names follow the existing deployment files (upper case).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_machine_id")]
    pub machine_id: String,
    pub mqtt_broker: BrokerConfig,
    #[serde(default)]
    pub rfid: RfidReaders,
    #[serde(default)]
    pub pgv: Option<PgvConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BrokerConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RfidReaders {
    #[serde(default)]
    pub travel: Option<RfidReaderConfig>,
    #[serde(default)]
    pub front: Option<RfidReaderConfig>,
    #[serde(default)]
    pub back: Option<RfidReaderConfig>,
}

impl RfidReaders {
    pub fn get(&self, position: ReaderPosition) -> Option<&RfidReaderConfig> {
        match position {
            ReaderPosition::Travel => self.travel.as_ref(),
            ReaderPosition::Front => self.front.as_ref(),
            ReaderPosition::Back => self.back.as_ref(),
        }
    }

    /// Configured readers with `ENABLED: true`, in travel/front/back order
    pub fn enabled(&self) -> impl Iterator<Item = (ReaderPosition, &RfidReaderConfig)> + '_ {
        ReaderPosition::ALL
            .into_iter()
            .filter_map(move |position| self.get(position).map(|cfg| (position, cfg)))
            .filter(|(_, cfg)| cfg.enabled)
    }
}

/// Command to send each cycle: a named preset or raw hex bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderCommand(pub String);

impl ReaderCommand {
    /// `"multi"`, `"single"` or hex such as `"BB 00 22 00 00 22 7E"`
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self.0.to_lowercase().as_str() {
            "multi" => Ok(rfid::MULTI_READ_COMMAND.to_vec()),
            "single" => Ok(rfid::SINGLE_READ_COMMAND.to_vec()),
            _ => parse_hex(&self.0),
        }
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&compact)
        .map_err(|e| ConfigError::Invalid(format!("command '{}': {}", text, e)))?;
    if bytes.is_empty() {
        return Err(ConfigError::Invalid("command must not be empty".to_string()));
    }
    Ok(bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RfidReaderConfig {
    #[serde(default)]
    pub enabled: bool,
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baudrate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default)]
    pub command: Option<ReaderCommand>,
    #[serde(default)]
    pub tag_layout: TagLayout,
    #[serde(default)]
    pub cycle_delay_ms: u64,
}

impl RfidReaderConfig {
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.port.clone(), self.baudrate)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }

    pub fn decoder(&self) -> Result<RfidDecoder> {
        let command = match &self.command {
            Some(command) => command.to_bytes()?,
            None => rfid::MULTI_READ_COMMAND.to_vec(),
        };
        Ok(RfidDecoder::with_options(
            command,
            self.max_frame_len,
            self.tag_layout,
            Duration::from_millis(self.timeout_ms),
        ))
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    fn validate(&self, label: &str) -> Result<()> {
        check_port(label, &self.port, self.baudrate, self.timeout_ms)?;
        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "{}: MAX_FRAME_LEN must be at least {}",
                label, MIN_FRAME_LEN
            )));
        }
        self.tag_layout
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("{}: TAG_LAYOUT {}", label, e)))?;
        if let Some(command) = &self.command {
            command.to_bytes()
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", label, e)))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PgvConfig {
    #[serde(default)]
    pub enabled: bool,
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baudrate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub lane_command: Option<String>,
    #[serde(default)]
    pub request_command: Option<String>,
    #[serde(default)]
    pub cycle_delay_ms: u64,
}

impl PgvConfig {
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.port.clone(), self.baudrate)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }

    pub fn decoder(&self) -> Result<PgvDecoder> {
        let lane = match &self.lane_command {
            Some(text) => parse_hex(text)?,
            None => pgv::LANE_SELECT_COMMAND.to_vec(),
        };
        let request = match &self.request_command {
            Some(text) => parse_hex(text)?,
            None => pgv::DATA_REQUEST_COMMAND.to_vec(),
        };
        Ok(PgvDecoder::with_commands(
            lane,
            request,
            Duration::from_millis(self.timeout_ms),
        ))
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        check_port("PGV", &self.port, self.baudrate, self.timeout_ms)?;
        self.decoder()
            .map(|_| ())
            .map_err(|e| ConfigError::Invalid(format!("PGV: {}", e)))
    }
}

fn check_port(label: &str, port: &str, baudrate: u32, timeout_ms: u64) -> Result<()> {
    if port.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{}: PORT must not be empty", label)));
    }
    if baudrate == 0 {
        return Err(ConfigError::Invalid(format!("{}: BAUDRATE must be positive", label)));
    }
    if timeout_ms == 0 {
        return Err(ConfigError::Invalid(format!("{}: TIMEOUT_MS must be positive", label)));
    }
    Ok(())
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check every configured sensor, enabled or not
    pub fn validate(&self) -> Result<()> {
        if self.machine_id.trim().is_empty() {
            return Err(ConfigError::Invalid("MACHINE_ID must not be empty".to_string()));
        }
        if self.mqtt_broker.ip.trim().is_empty() {
            return Err(ConfigError::Invalid("MQTT_BROKER.IP must not be empty".to_string()));
        }
        if self.mqtt_broker.port == 0 {
            return Err(ConfigError::Invalid("MQTT_BROKER.PORT must be positive".to_string()));
        }
        for position in ReaderPosition::ALL {
            if let Some(reader) = self.rfid.get(position) {
                reader.validate(&format!("RFID.{}", position.as_str().to_uppercase()))?;
            }
        }
        if let Some(pgv) = &self.pgv {
            pgv.validate()?;
        }
        Ok(())
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        let client_id = self
            .mqtt_broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("agv-sensor-bridge-{}", self.machine_id));
        let mut settings = MqttSettings::new(self.mqtt_broker.ip.clone(), self.mqtt_broker.port, client_id);
        settings.keep_alive = Duration::from_secs(self.mqtt_broker.keep_alive_secs);
        settings
    }

    pub fn enabled_pgv(&self) -> Option<&PgvConfig> {
        self.pgv.as_ref().filter(|p| p.enabled)
    }
}
