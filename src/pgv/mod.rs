//! PGV100 optical read head (Pepperl+Fuchs).
//!
//! Each poll selects the positioning lane, requests data, and decodes the
//! 21-byte response into X/Y/angle/tag.
pub mod decoder;
pub mod poller;

pub use decoder::{decode_frame, PgvCycle, PgvDecoder, PgvReading};
pub use poller::{reading_payload, PgvHandle, PgvPoller, PgvSnapshot, PgvStats};

/// Lane select; must precede every data request
pub const LANE_SELECT_COMMAND: [u8; 3] = [0xE4, 0x1B, 0xFF];
/// Position data request
pub const DATA_REQUEST_COMMAND: [u8; 3] = [0xC8, 0x37, 0xFF];
pub const FRAME_LEN: usize = 21;

/// Warning byte value meaning the head sees no code tape
pub const WARNING_NO_POSITION: u8 = 2;

pub(crate) const WARNING_OFFSET: usize = 0;
pub(crate) const X_RANGE: std::ops::Range<usize> = 2..6;
pub(crate) const Y_RANGE: std::ops::Range<usize> = 6..8;
pub(crate) const ANGLE_RANGE: std::ops::Range<usize> = 10..12;
pub(crate) const TAG_RANGE: std::ops::Range<usize> = 14..18;
