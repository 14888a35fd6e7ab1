pub mod app;

pub use app::{
    AppConfig, BrokerConfig, ConfigError, PgvConfig, ReaderCommand, RfidReaderConfig, RfidReaders,
};
