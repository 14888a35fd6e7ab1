use std::time::Duration;

use tokio::time::Instant;

use super::{FrameError, RawFrame, Result};
use crate::serial::ByteChannel;

pub const DEFAULT_MAX_FRAME_LEN: usize = 256;
/// Read windows a call may spend hunting for the start marker on a line
/// that keeps delivering other bytes
pub const IDLE_SCAN_WINDOWS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Waiting for the start marker; everything else is dropped
    Idle,
    /// Start marker seen, collecting until the end marker
    InFrame,
    /// End marker seen, frame handed out
    Complete,
}

/// Result of feeding one byte to a [`FrameAssembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Pending,
    Complete(RawFrame),
    /// `max_len` bytes went by without a complete frame
    Overflow,
}

/// Byte-at-a-time start/end marker state machine.
///
/// Bytes before the start marker are skipped. A second start marker inside a
/// frame is payload, not a restart. Only the frame buffer is bounded by
/// `max_len`; nothing is kept while idle.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    start: u8,
    end: u8,
    max_len: usize,
    state: ReaderState,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(start: u8, end: u8, max_len: usize) -> Self {
        Self {
            start,
            end,
            max_len,
            state: ReaderState::Idle,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, byte: u8) -> Feed {
        match self.state {
            ReaderState::Idle | ReaderState::Complete => {
                if byte == self.start {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.state = ReaderState::InFrame;
                    Feed::Pending
                } else {
                    self.state = ReaderState::Idle;
                    Feed::Pending
                }
            }
            ReaderState::InFrame => {
                if self.buffer.len() >= self.max_len {
                    self.reset();
                    return Feed::Overflow;
                }
                self.buffer.push(byte);
                if byte == self.end {
                    self.state = ReaderState::Complete;
                    Feed::Complete(RawFrame::new(std::mem::take(&mut self.buffer)))
                } else {
                    Feed::Pending
                }
            }
        }
    }

    /// Drop any partial frame and return to `Idle`. Returns the number of
    /// buffered bytes that were thrown away.
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.state = ReaderState::Idle;
        discarded
    }
}

/// Reads one marker-delimited frame per call.
#[derive(Debug, Clone)]
pub struct DelimitedFrameReader {
    start: u8,
    end: u8,
    max_len: usize,
    timeout: Duration,
}

impl DelimitedFrameReader {
    pub fn new(start: u8, end: u8, max_len: usize, timeout: Duration) -> Self {
        Self {
            start,
            end,
            max_len,
            timeout,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Pull bytes until a complete frame is assembled.
    ///
    /// Stops reading as soon as the end marker arrives, so bytes after it stay
    /// in the channel. A timeout in either state discards the partial frame;
    /// no partial frame is ever returned. A line that never shows the start
    /// marker is given up on after `IDLE_SCAN_WINDOWS` read windows.
    pub async fn read_frame<C>(&self, channel: &mut C) -> Result<RawFrame>
    where
        C: ByteChannel + ?Sized,
    {
        let mut assembler = FrameAssembler::new(self.start, self.end, self.max_len);
        let scan_deadline = Instant::now() + self.timeout * IDLE_SCAN_WINDOWS;

        loop {
            if assembler.state() != ReaderState::InFrame && Instant::now() >= scan_deadline {
                return Err(FrameError::Timeout { discarded: 0 });
            }

            let byte = match channel.read_byte_or_timeout(self.timeout).await? {
                Some(byte) => byte,
                None => {
                    let discarded = assembler.reset();
                    return Err(FrameError::Timeout { discarded });
                }
            };

            match assembler.push(byte) {
                Feed::Pending => {}
                Feed::Complete(frame) => return Ok(frame),
                Feed::Overflow => {
                    return Err(FrameError::Overflow {
                        limit: self.max_len,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::serial::{self, ScriptedChannel, SerialError};

    const WINDOW: Duration = Duration::from_millis(5);

    fn reader(max_len: usize) -> DelimitedFrameReader {
        DelimitedFrameReader::new(0xBB, 0x7E, max_len, WINDOW)
    }

    #[test]
    fn test_assembler_transitions() {
        let mut assembler = FrameAssembler::new(0xBB, 0x7E, 16);
        assert_eq!(assembler.push(0x11), Feed::Pending);
        assert_eq!(assembler.state(), ReaderState::Idle);
        assert_eq!(assembler.push(0xBB), Feed::Pending);
        assert_eq!(assembler.state(), ReaderState::InFrame);
        assert_eq!(assembler.push(0x01), Feed::Pending);
        assert_eq!(
            assembler.push(0x7E),
            Feed::Complete(RawFrame::new(vec![0xBB, 0x01, 0x7E]))
        );
        assert_eq!(assembler.state(), ReaderState::Complete);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_start_marker_inside_frame_is_payload() {
        let mut assembler = FrameAssembler::new(0xBB, 0x7E, 16);
        for b in [0xBB, 0xBB, 0x02] {
            assert_eq!(assembler.push(b), Feed::Pending);
        }
        assert_eq!(
            assembler.push(0x7E),
            Feed::Complete(RawFrame::new(vec![0xBB, 0xBB, 0x02, 0x7E]))
        );
    }

    #[test]
    fn test_assembler_bounds_frame_length() {
        let mut assembler = FrameAssembler::new(0xBB, 0x7E, 4);
        for b in [0xBB, 0x01, 0x02, 0x03] {
            assert_eq!(assembler.push(b), Feed::Pending);
        }
        assert_eq!(assembler.push(0x04), Feed::Overflow);
        assert_eq!(assembler.state(), ReaderState::Idle);
    }

    #[test]
    fn test_idle_noise_never_overflows() {
        let mut assembler = FrameAssembler::new(0xBB, 0x7E, 3);
        for _ in 0..10 {
            assert_eq!(assembler.push(0x00), Feed::Pending);
            assert_eq!(assembler.state(), ReaderState::Idle);
        }
        assert_eq!(assembler.push(0xBB), Feed::Pending);
        assert_eq!(
            assembler.push(0x7E),
            Feed::Complete(RawFrame::new(vec![0xBB, 0x7E]))
        );
    }

    #[tokio::test]
    async fn test_resync_skips_leading_noise() {
        let mut channel = ScriptedChannel::from_bytes(&[0x11, 0xBB, 0x01, 0x02, 0x7E, 0x33]);
        let frame = reader(DEFAULT_MAX_FRAME_LEN)
            .read_frame(&mut channel)
            .await
            .unwrap();

        assert_eq!(frame.as_bytes(), &[0xBB, 0x01, 0x02, 0x7E]);
        assert_eq!(channel.pending_bytes(), vec![0x33]);
    }

    #[tokio::test]
    async fn test_long_noise_before_frame_is_skipped() {
        let mut bytes = vec![0x00; 300];
        bytes.extend([0xBB, 0x01, 0x7E]);
        let mut channel = ScriptedChannel::from_bytes(&bytes);

        let frame = reader(DEFAULT_MAX_FRAME_LEN)
            .read_frame(&mut channel)
            .await
            .unwrap();
        assert_eq!(frame.as_bytes(), &[0xBB, 0x01, 0x7E]);
    }

    #[tokio::test]
    async fn test_timeout_mid_frame_discards_partial() {
        let mut channel = ScriptedChannel::from_bytes(&[0xBB, 0x01, 0x02])
            .then_gap()
            .then_bytes(&[0xBB, 0x7E]);
        let reader = reader(DEFAULT_MAX_FRAME_LEN);

        match reader.read_frame(&mut channel).await {
            Err(FrameError::Timeout { discarded }) => assert_eq!(discarded, 3),
            other => panic!("expected timeout, got {:?}", other),
        }
        let next = reader.read_frame(&mut channel).await.unwrap();
        assert_eq!(next.as_bytes(), &[0xBB, 0x7E]);
    }

    #[tokio::test]
    async fn test_timeout_while_idle() {
        let mut channel = ScriptedChannel::new();
        match reader(DEFAULT_MAX_FRAME_LEN).read_frame(&mut channel).await {
            Err(FrameError::Timeout { discarded }) => assert_eq!(discarded, 0),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runaway_frame_overflows() {
        let mut bytes = vec![0xBB];
        bytes.extend(std::iter::repeat(0x01).take(20));
        let mut channel = ScriptedChannel::from_bytes(&bytes);

        match reader(8).read_frame(&mut channel).await {
            Err(FrameError::Overflow { limit }) => assert_eq!(limit, 8),
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_failure_is_fatal() {
        let mut channel = ScriptedChannel::from_bytes(&[0xBB]).then_fail("unplugged");
        let err = reader(DEFAULT_MAX_FRAME_LEN)
            .read_frame(&mut channel)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Channel(SerialError::Closed(_))));
        assert!(err.is_fatal());
    }

    /// Line that never goes quiet but never sends a start marker
    struct NoisyLine;

    #[async_trait]
    impl ByteChannel for NoisyLine {
        async fn write_all(&mut self, _data: &[u8]) -> serial::Result<()> {
            Ok(())
        }

        async fn read_exact_or_timeout(&mut self, n: usize, _timeout: Duration) -> serial::Result<Vec<u8>> {
            Ok(vec![0x00; n])
        }

        async fn read_byte_or_timeout(&mut self, _timeout: Duration) -> serial::Result<Option<u8>> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(Some(0x00))
        }
    }

    #[tokio::test]
    async fn test_endless_noise_ends_as_timeout() {
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            reader(DEFAULT_MAX_FRAME_LEN).read_frame(&mut NoisyLine),
        )
        .await
        .expect("idle scan never gave up");

        match result {
            Err(FrameError::Timeout { discarded }) => assert_eq!(discarded, 0),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
