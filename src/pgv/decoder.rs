use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::*;
use crate::codec::{decode_angle, decode_u32_be, decode_x, decode_y, AngleReading};
use crate::frame::{self, FixedLengthFrameReader, FrameError};
use crate::serial::ByteChannel;

/// One decoded position from the read head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgvReading {
    /// Position along the tape
    pub x: u32,
    /// Lateral deviation from the tape centre (signed)
    pub y: i32,
    pub angle: AngleReading,
    /// Control code / tag number under the head
    pub tag: u32,
    /// Raw warning byte (frame byte 0)
    pub warning: u8,
}

/// Outcome of decoding one complete response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgvCycle {
    Reading(PgvReading),
    /// Head reported no positioning; fields are not meaningful
    NoPositioning { warning: u8 },
}

fn word<const N: usize>(bytes: &[u8], range: Range<usize>) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[range]);
    out
}

/// Decode a PGV response. Pure: the same bytes always give the same result.
pub fn decode_frame(bytes: &[u8]) -> frame::Result<PgvCycle> {
    if bytes.len() < FRAME_LEN {
        return Err(FrameError::Malformed {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let warning = bytes[WARNING_OFFSET];
    if warning == WARNING_NO_POSITION {
        return Ok(PgvCycle::NoPositioning { warning });
    }

    let [hi, lo] = word::<2>(bytes, ANGLE_RANGE);

    Ok(PgvCycle::Reading(PgvReading {
        x: decode_x(word(bytes, X_RANGE)),
        y: decode_y(u16::from_be_bytes(word(bytes, Y_RANGE))),
        angle: decode_angle(hi, lo),
        tag: decode_u32_be(word(bytes, TAG_RANGE)),
        warning,
    }))
}

/// Drives one lane-select / data-request exchange and decodes the reply
#[derive(Debug, Clone)]
pub struct PgvDecoder {
    reader: FixedLengthFrameReader,
}

impl PgvDecoder {
    pub fn new(timeout: Duration) -> Self {
        Self::with_commands(
            LANE_SELECT_COMMAND.to_vec(),
            DATA_REQUEST_COMMAND.to_vec(),
            timeout,
        )
    }

    pub fn with_commands(lane_select: Vec<u8>, data_request: Vec<u8>, timeout: Duration) -> Self {
        Self {
            reader: FixedLengthFrameReader::new(lane_select, data_request, FRAME_LEN, timeout),
        }
    }

    pub fn reader(&self) -> &FixedLengthFrameReader {
        &self.reader
    }

    pub async fn poll_once<C>(&self, channel: &mut C) -> frame::Result<PgvCycle>
    where
        C: ByteChannel + ?Sized,
    {
        let response = self.reader.read_cycle(channel).await?;
        decode_frame(response.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = 0x00;
        frame[2..6].copy_from_slice(&[0x00, 0x00, 0x30, 0x39]); // 12345
        frame[6..8].copy_from_slice(&[0x7F, 0x7E]); // -2
        frame[10..12].copy_from_slice(&[0x01, 0x05]); // 133
        frame[14..18].copy_from_slice(&[0x00, 0x00, 0x00, 0x2A]); // 42
        frame
    }

    #[test]
    fn test_decode_reading() {
        let cycle = decode_frame(&sample_frame()).unwrap();
        assert_eq!(
            cycle,
            PgvCycle::Reading(PgvReading {
                x: 12345,
                y: -2,
                angle: AngleReading::Decoded { value: 133 },
                tag: 42,
                warning: 0,
            })
        );
    }

    #[test]
    fn test_no_positioning_skips_fields() {
        let mut frame = sample_frame();
        frame[0] = WARNING_NO_POSITION;
        assert_eq!(
            decode_frame(&frame).unwrap(),
            PgvCycle::NoPositioning { warning: 2 }
        );
    }

    #[test]
    fn test_short_frame_is_malformed() {
        let err = decode_frame(&sample_frame()[..10]).unwrap_err();
        assert!(matches!(err, FrameError::Malformed { expected: 21, actual: 10 }));
    }

    #[test]
    fn test_low_confidence_angle_still_yields_reading() {
        let mut frame = sample_frame();
        frame[10..12].copy_from_slice(&[0x05, 0x05]);
        match decode_frame(&frame).unwrap() {
            PgvCycle::Reading(reading) => assert!(reading.angle.is_low_confidence()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        let frame = sample_frame();
        assert_eq!(decode_frame(&frame).unwrap(), decode_frame(&frame).unwrap());
    }
}
