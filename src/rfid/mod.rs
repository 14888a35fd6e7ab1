//! UHF RFID reader speaking the 0xBB ... 0x7E framed protocol.
pub mod decoder;
pub mod poller;

pub use decoder::{extract_tag, RecordKind, RfidDecoder, RfidTagRecord, TagLayout};
pub use poller::{RfidPoller, RfidStats};

/// Multiple-read (inventory) request
pub const MULTI_READ_COMMAND: [u8; 10] = [0xBB, 0x00, 0x27, 0x00, 0x03, 0x22, 0xFF, 0xFF, 0x4A, 0x7E];
/// Single-read request; kept for readers that reject the multiple-read form
pub const SINGLE_READ_COMMAND: [u8; 7] = [0xBB, 0x00, 0x22, 0x00, 0x00, 0x22, 0x7E];

pub const START_MARKER: u8 = 0xBB;
pub const END_MARKER: u8 = 0x7E;
