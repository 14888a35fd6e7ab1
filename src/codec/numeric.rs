//! Field encodings used by the PGV100 read head.
//!
//! None of these are plain two's complement. The Y axis reflects around
//! 0x7F7F and the angle field carries carry/offset artifacts in its high
//! byte that have to be undone before the value means anything.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Values at or above this are on the negative side of the Y axis
const Y_NEGATIVE_FLOOR: u16 = 0x7F00;
/// Raw Y value that decodes to -1
const Y_REFLECTION_BASE: i32 = 0x7F7F;
/// Offset the head adds when the angle high byte reads 1
const ANGLE_HIGH_ONE_OFFSET: i32 = 128;

/// Decode the Y deviation (frame bytes 6..8).
///
/// `0x0000..=0x7EFF` pass through unchanged; from `0x7F00` upward the value
/// is `-1 - (0x7F7F - raw)`, so `0x7F7F` is -1 and `0x7F00` is -128.
pub fn decode_y(raw: u16) -> i32 {
    if raw >= Y_NEGATIVE_FLOOR {
        -1 - (Y_REFLECTION_BASE - raw as i32)
    } else {
        raw as i32
    }
}

/// Decode the X position (frame bytes 2..6): plain big-endian.
pub fn decode_x(bytes: [u8; 4]) -> u32 {
    decode_u32_be(bytes)
}

pub fn decode_u32_be(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Decoded angle field.
///
/// `Undecoded` is not an error: the head produced a high byte outside the
/// window the correction table covers. Consumers should treat it as a
/// low-confidence reading and must not use it as a heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AngleReading {
    Decoded { value: i32 },
    Undecoded { hi: u8, lo: u8 },
}

impl AngleReading {
    pub fn value(&self) -> Option<i32> {
        match self {
            AngleReading::Decoded { value } => Some(*value),
            AngleReading::Undecoded { .. } => None,
        }
    }

    pub fn is_low_confidence(&self) -> bool {
        matches!(self, AngleReading::Undecoded { .. })
    }

    /// Raw bytes as an uppercase hex pair, e.g. `"0505"`
    pub fn raw_hex(&self) -> Option<String> {
        match self {
            AngleReading::Decoded { .. } => None,
            AngleReading::Undecoded { hi, lo } => Some(format!("{:02X}{:02X}", hi, lo)),
        }
    }
}

impl fmt::Display for AngleReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleReading::Decoded { value } => write!(f, "{}", value),
            AngleReading::Undecoded { hi, lo } => write!(f, "{:02X}{:02X}", hi, lo),
        }
    }
}

/// Decode the angle field (frame bytes 10..12).
///
/// | high byte | result                          |
/// |-----------|---------------------------------|
/// | 0         | `lo`                            |
/// | 1         | `0x01lo - 128`                  |
/// | 2         | `0x01lo` (high byte carried one) |
/// | other     | `Undecoded`                     |
pub fn decode_angle(hi: u8, lo: u8) -> AngleReading {
    match hi {
        0 => AngleReading::Decoded {
            value: u16::from_be_bytes([hi, lo]) as i32,
        },
        1 => AngleReading::Decoded {
            value: u16::from_be_bytes([hi, lo]) as i32 - ANGLE_HIGH_ONE_OFFSET,
        },
        2 => AngleReading::Decoded {
            value: u16::from_be_bytes([hi - 1, lo]) as i32,
        },
        _ => AngleReading::Undecoded { hi, lo },
    }
}
