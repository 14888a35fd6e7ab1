use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{END_MARKER, MULTI_READ_COMMAND, START_MARKER};
use crate::frame::{self, spaced_hex, DelimitedFrameReader, RawFrame, DEFAULT_MAX_FRAME_LEN};
use crate::serial::ByteChannel;

/// Where the tag id sits inside a response frame.
///
/// Taken from the reader's documented layout for the current firmware;
/// other revisions may differ, hence configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TagLayout {
    /// Frames of this length or shorter carry no tag
    pub no_tag_max_len: usize,
    pub payload_start: usize,
    /// Exclusive
    pub payload_end: usize,
}

impl Default for TagLayout {
    fn default() -> Self {
        Self {
            no_tag_max_len: 8,
            payload_start: 8,
            payload_end: 20,
        }
    }
}

impl TagLayout {
    pub fn validate(&self) -> Result<(), String> {
        if self.payload_start >= self.payload_end {
            return Err(format!(
                "payload start {} must be before payload end {}",
                self.payload_start, self.payload_end
            ));
        }
        if self.payload_start > self.no_tag_max_len {
            return Err(format!(
                "payload start {} is past the no-tag threshold {}",
                self.payload_start, self.no_tag_max_len
            ));
        }
        Ok(())
    }

    pub fn payload_len(&self) -> usize {
        self.payload_end - self.payload_start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Tag,
    /// Reader answered but saw no tag; payload is the whole short frame
    NoTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfidTagRecord {
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

impl RfidTagRecord {
    pub fn is_tag(&self) -> bool {
        self.kind == RecordKind::Tag
    }

    /// Uppercase, space separated; this is what gets published
    pub fn to_hex(&self) -> String {
        spaced_hex(&self.payload)
    }
}

/// Split a complete frame into tag payload or "no tag". Pure.
///
/// Frames longer than the threshold yield `[payload_start, payload_end)`,
/// clamped to the frame length.
pub fn extract_tag(frame: &RawFrame, layout: &TagLayout) -> RfidTagRecord {
    let bytes = frame.as_bytes();

    if bytes.len() > layout.no_tag_max_len {
        let end = layout.payload_end.min(bytes.len());
        let start = layout.payload_start.min(end);
        RfidTagRecord {
            kind: RecordKind::Tag,
            payload: bytes[start..end].to_vec(),
        }
    } else {
        RfidTagRecord {
            kind: RecordKind::NoTag,
            payload: bytes.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RfidDecoder {
    command: Vec<u8>,
    reader: DelimitedFrameReader,
    layout: TagLayout,
}

impl RfidDecoder {
    pub fn new(timeout: Duration) -> Self {
        Self::with_options(
            MULTI_READ_COMMAND.to_vec(),
            DEFAULT_MAX_FRAME_LEN,
            TagLayout::default(),
            timeout,
        )
    }

    pub fn with_options(command: Vec<u8>, max_frame_len: usize, layout: TagLayout, timeout: Duration) -> Self {
        Self {
            command,
            reader: DelimitedFrameReader::new(START_MARKER, END_MARKER, max_frame_len, timeout),
            layout,
        }
    }

    pub fn layout(&self) -> &TagLayout {
        &self.layout
    }

    pub fn command(&self) -> &[u8] {
        &self.command
    }

    /// Read window for one byte
    pub fn timeout(&self) -> Duration {
        self.reader.timeout()
    }

    /// Write the read command and decode the single frame that answers it
    pub async fn poll_once<C>(&self, channel: &mut C) -> frame::Result<RfidTagRecord>
    where
        C: ByteChannel + ?Sized,
    {
        channel.write_all(&self.command).await?;
        let frame = self.reader.read_frame(channel).await?;
        log::trace!("frame: {}", frame);
        Ok(extract_tag(&frame, &self.layout))
    }
}
