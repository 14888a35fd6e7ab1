use std::time::Duration;

use agv_sensor_bridge::pgv::{PgvDecoder, PgvPoller};
use agv_sensor_bridge::rfid::{RfidDecoder, RfidPoller};
use agv_sensor_bridge::serial::ScriptedChannel;
use agv_sensor_bridge::supervisor::Supervisor;
use tokio::sync::mpsc;

const WINDOW: Duration = Duration::from_millis(5);

#[tokio::test]
async fn test_shutdown_stops_every_sensor() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut supervisor = Supervisor::new();

    let (pgv, handle) = PgvPoller::new(PgvDecoder::new(WINDOW), ScriptedChannel::new());
    supervisor.spawn("pgv", move |flag| pgv.run(flag));

    let rfid = RfidPoller::new("front", RfidDecoder::new(WINDOW), ScriptedChannel::new(), tx, "rfid/m/front");
    supervisor.spawn("rfid-front", move |flag| rfid.run(flag));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(supervisor.running(), 2);

    let results = supervisor.shutdown().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    // Silent devices: nothing published, nothing captured
    assert!(rx.recv().await.is_none());
    assert_eq!(handle.latest(), None);
}

#[tokio::test]
async fn test_failed_sensor_does_not_stop_others() {
    let mut supervisor = Supervisor::new();

    let failing = ScriptedChannel::new().then_fail("port vanished");
    let (broken, _) = PgvPoller::new(PgvDecoder::new(WINDOW), failing);
    supervisor.spawn("pgv", move |flag| broken.run(flag));

    let (tx, _rx) = mpsc::channel(8);
    let healthy = RfidPoller::new("back", RfidDecoder::new(WINDOW), ScriptedChannel::new(), tx, "rfid/m/back");
    supervisor.spawn("rfid-back", move |flag| healthy.run(flag));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(supervisor.running(), 1);

    let results = supervisor.shutdown().await;
    let pgv = results.iter().find(|(name, _)| name == "pgv").unwrap();
    assert!(pgv.1.as_ref().unwrap_err().is_fatal());
    let rfid = results.iter().find(|(name, _)| name == "rfid-back").unwrap();
    assert!(rfid.1.is_ok());
}
