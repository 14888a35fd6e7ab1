pub mod codec;
pub mod config;
pub mod frame;
pub mod pgv;
pub mod publish;
pub mod rfid;
pub mod serial;
pub mod supervisor;

pub use config::AppConfig;
pub use frame::{FrameError, RawFrame};
pub use pgv::{PgvHandle, PgvPoller, PgvReading};
pub use publish::{PublishMessage, Publisher, ReaderPosition};
pub use rfid::{RfidPoller, RfidTagRecord};
pub use serial::{ByteChannel, SerialError, SerialInterface, SerialSettings};
pub use supervisor::{SensorError, ShutdownFlag, Supervisor};
