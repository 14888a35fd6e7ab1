use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use super::{PgvCycle, PgvDecoder, PgvReading};
use crate::codec::AngleReading;
use crate::frame::FrameError;
use crate::publish::{self, PublishMessage};
use crate::serial::ByteChannel;
use crate::supervisor::{Result, ShutdownFlag};

/// Last successfully decoded reading.
///
/// Replaced wholesale (new `Arc`) on every update so readers never see a
/// half-written value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PgvSnapshot {
    pub reading: Option<PgvReading>,
    pub captured_at: Option<DateTime<Utc>>,
    /// Incremented on every successful decode
    pub seq: u64,
}

/// Read side of the snapshot; cheap to clone and hand to other tasks
#[derive(Debug, Clone)]
pub struct PgvHandle {
    snapshot_rx: watch::Receiver<Arc<PgvSnapshot>>,
}

impl PgvHandle {
    pub fn snapshot(&self) -> Arc<PgvSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn latest(&self) -> Option<PgvReading> {
        self.snapshot_rx.borrow().reading
    }

    pub fn x(&self) -> Option<u32> {
        self.latest().map(|r| r.x)
    }

    pub fn y(&self) -> Option<i32> {
        self.latest().map(|r| r.y)
    }

    pub fn angle(&self) -> Option<AngleReading> {
        self.latest().map(|r| r.angle)
    }

    pub fn tag(&self) -> Option<u32> {
        self.latest().map(|r| r.tag)
    }

    /// Wait for the next update; `false` once the poller is gone
    pub async fn changed(&mut self) -> bool {
        self.snapshot_rx.changed().await.is_ok()
    }
}

/// Statistics for one poll loop run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgvStats {
    pub cycles: u64,
    pub readings: u64,
    pub no_positioning: u64,
    pub skipped: u64,
    pub low_confidence: u64,
    /// Readings the publisher had no room for
    pub dropped: u64,
}

/// Owns the PGV channel and runs the poll loop.
pub struct PgvPoller<C> {
    decoder: PgvDecoder,
    channel: C,
    snapshot_tx: watch::Sender<Arc<PgvSnapshot>>,
    sink: Option<(mpsc::Sender<PublishMessage>, String)>,
    cycle_delay: Duration,
    stats: PgvStats,
}

impl<C: ByteChannel> PgvPoller<C> {
    pub fn new(decoder: PgvDecoder, channel: C) -> (Self, PgvHandle) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(PgvSnapshot::default()));
        let poller = Self {
            decoder,
            channel,
            snapshot_tx,
            sink: None,
            cycle_delay: Duration::ZERO,
            stats: PgvStats::default(),
        };
        (poller, PgvHandle { snapshot_rx })
    }

    /// Also forward every reading as JSON to `topic`
    pub fn with_sink(mut self, sink: mpsc::Sender<PublishMessage>, topic: impl Into<String>) -> Self {
        self.sink = Some((sink, topic.into()));
        self
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn stats(&self) -> &PgvStats {
        &self.stats
    }

    /// Run one cycle. Non-fatal problems are logged and swallowed; the
    /// snapshot is only touched on a successful reading.
    pub async fn poll_once(&mut self) -> Result<Option<PgvReading>> {
        self.stats.cycles += 1;

        match self.decoder.poll_once(&mut self.channel).await {
            Ok(PgvCycle::Reading(reading)) => {
                self.stats.readings += 1;
                if reading.angle.is_low_confidence() {
                    self.stats.low_confidence += 1;
                    log::debug!("Angle outside decodable window: {}", reading.angle);
                }
                self.store(reading);
                self.forward(&reading).await?;
                Ok(Some(reading))
            }
            Ok(PgvCycle::NoPositioning { warning }) => {
                self.stats.no_positioning += 1;
                log::debug!("No positioning (warning byte 0x{:02X})", warning);
                Ok(None)
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(FrameError::Malformed { expected, actual }) => {
                self.stats.skipped += 1;
                log::debug!("Skipping cycle: {} of {} byte(s)", actual, expected);
                Ok(None)
            }
            Err(e) => {
                self.stats.skipped += 1;
                log::warn!("Skipping cycle: {}", e);
                Ok(None)
            }
        }
    }

    /// Poll until shutdown is requested or the channel fails. The channel
    /// is dropped (port released) before this returns either way.
    pub async fn run(mut self, shutdown: ShutdownFlag) -> Result<()> {
        log::info!("PGV poll loop started");

        let outcome = loop {
            if !shutdown.is_running() {
                break Ok(());
            }
            if let Err(e) = self.poll_once().await {
                log::error!("PGV poll loop aborted: {}", e);
                break Err(e);
            }
            if !self.cycle_delay.is_zero() {
                tokio::time::sleep(self.cycle_delay).await;
            }
        };

        let stats = self.stats.clone();
        drop(self);
        log::info!(
            "PGV poll loop stopped after {} cycle(s): {} reading(s), {} without position, {} skipped",
            stats.cycles,
            stats.readings,
            stats.no_positioning,
            stats.skipped
        );
        outcome
    }

    fn store(&mut self, reading: PgvReading) {
        let seq = self.snapshot_tx.borrow().seq + 1;
        let snapshot = PgvSnapshot {
            reading: Some(reading),
            captured_at: Some(Utc::now()),
            seq,
        };
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    async fn forward(&mut self, reading: &PgvReading) -> Result<()> {
        let Some((sink, topic)) = &self.sink else {
            return Ok(());
        };
        let message = PublishMessage::new(topic.clone(), reading_payload(reading));
        if !publish::hand_off(sink, message, self.decoder.reader().timeout()).await? {
            self.stats.dropped += 1;
        }
        Ok(())
    }
}

/// JSON rendering of a reading for publishing
pub fn reading_payload(reading: &PgvReading) -> String {
    let angle = match reading.angle {
        AngleReading::Decoded { value } => serde_json::Value::from(value),
        AngleReading::Undecoded { .. } => serde_json::Value::from(reading.angle.to_string()),
    };
    serde_json::json!({
        "x": reading.x,
        "y": reading.y,
        "angle": angle,
        "angle_low_confidence": reading.angle.is_low_confidence(),
        "tag": reading.tag,
        "warning": reading.warning,
    })
    .to_string()
}
