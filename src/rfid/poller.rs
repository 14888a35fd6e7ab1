use std::time::Duration;

use tokio::sync::mpsc;

use super::{RfidDecoder, RfidTagRecord};
use crate::frame::FrameError;
use crate::publish::{self, PublishMessage};
use crate::serial::{ByteChannel, SerialError};
use crate::supervisor::{Result, ShutdownFlag};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RfidStats {
    pub cycles: u64,
    pub tags: u64,
    pub empty: u64,
    pub timeouts: u64,
    pub discarded: u64,
    /// Records the publisher had no room for
    pub dropped: u64,
}

/// Owns one reader's channel. Every frame is handed to the publishing side
/// through `sink`; nothing is retained here.
pub struct RfidPoller<C> {
    name: String,
    decoder: RfidDecoder,
    channel: C,
    sink: mpsc::Sender<PublishMessage>,
    topic: String,
    cycle_delay: Duration,
    stats: RfidStats,
}

impl<C: ByteChannel> RfidPoller<C> {
    pub fn new(
        name: impl Into<String>,
        decoder: RfidDecoder,
        channel: C,
        sink: mpsc::Sender<PublishMessage>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            decoder,
            channel,
            sink,
            topic: topic.into(),
            cycle_delay: Duration::ZERO,
            stats: RfidStats::default(),
        }
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn stats(&self) -> &RfidStats {
        &self.stats
    }

    /// Run one request/response cycle and publish its result.
    pub async fn poll_once(&mut self) -> Result<Option<RfidTagRecord>> {
        self.stats.cycles += 1;

        let record = match self.decoder.poll_once(&mut self.channel).await {
            Ok(record) => record,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(FrameError::Timeout { discarded }) => {
                self.stats.timeouts += 1;
                if discarded > 0 {
                    log::debug!("[{}] timeout, {} partial byte(s) dropped", self.name, discarded);
                } else {
                    log::debug!("[{}] timeout: no complete frame received", self.name);
                }
                return Ok(None);
            }
            Err(FrameError::Channel(SerialError::Timeout)) => {
                self.stats.timeouts += 1;
                log::debug!("[{}] command write timed out", self.name);
                return Ok(None);
            }
            Err(e) => {
                self.stats.discarded += 1;
                log::warn!("[{}] {}", self.name, e);
                return Ok(None);
            }
        };

        if record.is_tag() {
            self.stats.tags += 1;
        } else {
            self.stats.empty += 1;
        }

        let message = PublishMessage::new(self.topic.clone(), record.to_hex());
        if !publish::hand_off(&self.sink, message, self.decoder.timeout()).await? {
            self.stats.dropped += 1;
        }

        Ok(Some(record))
    }

    /// Poll until shutdown or a fatal error; the channel is released before
    /// returning.
    pub async fn run(mut self, shutdown: ShutdownFlag) -> Result<()> {
        log::info!("[{}] RFID poll loop started, publishing to {}", self.name, self.topic);

        let outcome = loop {
            if !shutdown.is_running() {
                break Ok(());
            }
            if let Err(e) = self.poll_once().await {
                log::error!("[{}] RFID poll loop aborted: {}", self.name, e);
                break Err(e);
            }
            if !self.cycle_delay.is_zero() {
                tokio::time::sleep(self.cycle_delay).await;
            }
        };

        let name = std::mem::take(&mut self.name);
        let stats = self.stats.clone();
        drop(self);
        log::info!(
            "[{}] RFID poll loop stopped after {} cycle(s): {} tag(s), {} empty, {} timeout(s), {} dropped",
            name,
            stats.cycles,
            stats.tags,
            stats.empty,
            stats.timeouts,
            stats.dropped
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::PublishError;
    use crate::rfid::MULTI_READ_COMMAND;
    use crate::serial::ScriptedChannel;
    use crate::supervisor::{SensorError, Supervisor};

    const WINDOW: Duration = Duration::from_millis(5);

    fn tag_frame() -> Vec<u8> {
        let mut frame = vec![0xBB, 0x02, 0x22, 0x00, 0x11, 0xC6, 0x30, 0x00];
        frame.extend(1u8..=12);
        frame.extend([0x2B, 0x7E]);
        frame
    }

    #[tokio::test]
    async fn test_tag_published_as_hex() {
        let channel = ScriptedChannel::from_bytes(&tag_frame());
        let (tx, mut rx) = mpsc::channel(4);
        let mut poller = RfidPoller::new("front", RfidDecoder::new(WINDOW), channel, tx, "rfid/m1/front");

        let record = poller.poll_once().await.unwrap().unwrap();
        assert!(record.is_tag());

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "rfid/m1/front");
        assert_eq!(message.payload, "01 02 03 04 05 06 07 08 09 0A 0B 0C");
    }

    #[tokio::test]
    async fn test_no_tag_frame_published_whole() {
        let channel = ScriptedChannel::from_bytes(&[0xBB, 0x01, 0xFF, 0x00, 0x01, 0x15, 0x16, 0x7E]);
        let (tx, mut rx) = mpsc::channel(4);
        let mut poller = RfidPoller::new("back", RfidDecoder::new(WINDOW), channel, tx, "rfid/m1/back");

        poller.poll_once().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, "BB 01 FF 00 01 15 16 7E");
        assert_eq!(poller.stats().empty, 1);
    }

    #[tokio::test]
    async fn test_timeout_publishes_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut poller = RfidPoller::new(
            "travel",
            RfidDecoder::new(WINDOW),
            ScriptedChannel::from_bytes(&[0xBB, 0x01]).then_gap(),
            tx,
            "rfid/m1/travel",
        );

        assert_eq!(poller.poll_once().await.unwrap(), None);
        assert_eq!(poller.stats().timeouts, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_command_written_every_cycle() {
        let mut script = tag_frame();
        script.extend(tag_frame());
        let channel = ScriptedChannel::from_bytes(&script);
        let writes = channel.writes_handle();
        let (tx, _rx) = mpsc::channel(4);
        let mut poller = RfidPoller::new("front", RfidDecoder::new(WINDOW), channel, tx, "t");

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();
        let writes = writes.lock().unwrap().clone();
        assert_eq!(writes, vec![MULTI_READ_COMMAND.to_vec(), MULTI_READ_COMMAND.to_vec()]);
    }

    #[tokio::test]
    async fn test_closed_sink_is_fatal() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let poller = RfidPoller::new(
            "front",
            RfidDecoder::new(WINDOW),
            ScriptedChannel::from_bytes(&tag_frame()),
            tx,
            "t",
        );
        let err = poller.run(ShutdownFlag::new()).await.unwrap_err();
        assert!(matches!(err, SensorError::Publish(PublishError::Closed)));
    }

    #[tokio::test]
    async fn test_stalled_publisher_does_not_block_shutdown() {
        let mut script = Vec::new();
        for _ in 0..10 {
            script.extend(tag_frame());
        }
        let (tx, _rx) = mpsc::channel(2);
        let poller = RfidPoller::new(
            "front",
            RfidDecoder::new(WINDOW),
            ScriptedChannel::from_bytes(&script),
            tx,
            "t",
        );

        let mut supervisor = Supervisor::new();
        supervisor.spawn("rfid-front", move |flag| poller.run(flag));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let results = tokio::time::timeout(Duration::from_secs(2), supervisor.shutdown())
            .await
            .expect("poll loop stuck on a full handoff queue");
        assert!(results[0].1.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_waiting() {
        let mut script = tag_frame();
        script.extend(tag_frame());
        let (tx, _rx) = mpsc::channel(1);
        let mut poller = RfidPoller::new(
            "back",
            RfidDecoder::new(WINDOW),
            ScriptedChannel::from_bytes(&script),
            tx,
            "t",
        );

        assert!(poller.poll_once().await.unwrap().is_some());
        assert!(poller.poll_once().await.unwrap().is_some());
        assert_eq!(poller.stats().tags, 2);
        assert_eq!(poller.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_write_timeout_skips_one_cycle() {
        let channel = ScriptedChannel::new().then_write_stall().then_bytes(&tag_frame());
        let (tx, mut rx) = mpsc::channel(4);
        let mut poller = RfidPoller::new("travel", RfidDecoder::new(WINDOW), channel, tx, "t");

        assert_eq!(poller.poll_once().await.unwrap(), None);
        assert_eq!(poller.stats().timeouts, 1);
        assert!(poller.poll_once().await.unwrap().is_some());
        assert_eq!(rx.recv().await.unwrap().payload, "01 02 03 04 05 06 07 08 09 0A 0B 0C");
    }
}
