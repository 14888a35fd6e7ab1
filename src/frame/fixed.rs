use std::time::Duration;

use super::RawFrame;
use crate::serial::{self, ByteChannel};

/// Two-stage fixed-length exchange.
///
/// Every cycle writes the select command, reads (and drops) its reply, then
/// writes the request command and returns whatever arrived within the read
/// window. The returned frame may be shorter than `frame_len`; deciding what
/// a short read means is up to the caller.
#[derive(Debug, Clone)]
pub struct FixedLengthFrameReader {
    select_command: Vec<u8>,
    request_command: Vec<u8>,
    frame_len: usize,
    timeout: Duration,
}

impl FixedLengthFrameReader {
    pub fn new(
        select_command: Vec<u8>,
        request_command: Vec<u8>,
        frame_len: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            select_command,
            request_command,
            frame_len,
            timeout,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn read_cycle<C>(&self, channel: &mut C) -> serial::Result<RawFrame>
    where
        C: ByteChannel + ?Sized,
    {
        channel.write_all(&self.select_command).await?;
        let select_reply = channel
            .read_exact_or_timeout(self.frame_len, self.timeout)
            .await?;
        log::trace!("select reply: {} byte(s)", select_reply.len());

        channel.write_all(&self.request_command).await?;
        let response = channel
            .read_exact_or_timeout(self.frame_len, self.timeout)
            .await?;

        if response.len() < self.frame_len {
            log::debug!(
                "short read: {} of {} byte(s) before timeout",
                response.len(),
                self.frame_len
            );
        }

        Ok(RawFrame::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::ScriptedChannel;

    const WINDOW: Duration = Duration::from_millis(5);

    fn reader() -> FixedLengthFrameReader {
        FixedLengthFrameReader::new(vec![0xE4, 0x1B, 0xFF], vec![0xC8, 0x37, 0xFF], 21, WINDOW)
    }

    #[tokio::test]
    async fn test_commands_written_in_order() {
        let mut channel = ScriptedChannel::from_bytes(&[0u8; 21]).then_bytes(&[7u8; 21]);
        let frame = reader().read_cycle(&mut channel).await.unwrap();

        assert_eq!(frame.as_bytes(), &[7u8; 21]);
        assert_eq!(
            channel.writes(),
            vec![vec![0xE4, 0x1B, 0xFF], vec![0xC8, 0x37, 0xFF]]
        );
    }

    #[tokio::test]
    async fn test_short_read_is_returned_not_raised() {
        let mut channel = ScriptedChannel::from_bytes(&[0u8; 21]).then_bytes(&[1u8; 10]);
        let frame = reader().read_cycle(&mut channel).await.unwrap();
        assert_eq!(frame.len(), 10);
    }

    #[tokio::test]
    async fn test_channel_failure_propagates() {
        let mut channel = ScriptedChannel::new().then_fail("unplugged");
        let err = reader().read_cycle(&mut channel).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
