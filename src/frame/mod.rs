pub mod delimited;
pub mod fixed;

pub use delimited::{
    DelimitedFrameReader, Feed, FrameAssembler, ReaderState, DEFAULT_MAX_FRAME_LEN, IDLE_SCAN_WINDOWS,
};
pub use fixed::FixedLengthFrameReader;

use std::fmt;

use crate::serial::SerialError;

/// One complete device response, exactly as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    /// Uppercase hex with a single space between bytes, e.g. `"BB 01 7E"`
    pub fn to_spaced_hex(&self) -> String {
        spaced_hex(&self.0)
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for RawFrame {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for RawFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_spaced_hex())
    }
}

pub fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Nothing (or only part of a frame) arrived within the read window
    #[error("Read window elapsed, {discarded} partial byte(s) discarded")]
    Timeout { discarded: usize },

    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("No complete frame within {limit} bytes")]
    Overflow { limit: usize },

    #[error("Channel error: {0}")]
    Channel(#[from] SerialError),
}

impl FrameError {
    /// Only channel failures end a poll loop; everything else skips a cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            FrameError::Channel(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
