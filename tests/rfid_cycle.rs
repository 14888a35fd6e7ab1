use std::time::Duration;

use agv_sensor_bridge::publish::{self, CollectingPublisher, ReaderPosition};
use agv_sensor_bridge::rfid::{RfidDecoder, RfidPoller};
use agv_sensor_bridge::serial::ScriptedChannel;
use agv_sensor_bridge::supervisor::ShutdownFlag;
use tokio::sync::mpsc;

const WINDOW: Duration = Duration::from_millis(5);

fn tag_frame() -> Vec<u8> {
    let mut frame = vec![0xBB, 0x02, 0x22, 0x00, 0x11, 0xC6, 0x30, 0x00];
    frame.extend([0xE2, 0x00, 0x00, 0x17, 0x22, 0x0F, 0x01, 0x64, 0x17, 0x50, 0x5E, 0x8A]);
    frame.extend([0x2B, 0x7E]);
    frame
}

#[tokio::test]
async fn test_rfid_cycles_reach_publisher() {
    // Line noise before the first frame, then a tag, then "no tag"
    let channel = ScriptedChannel::from_bytes(&[0x00, 0x13])
        .then_bytes(&tag_frame())
        .then_bytes(&[0xBB, 0x01, 0xFF, 0x00, 0x01, 0x15, 0x16, 0x7E])
        .then_fail("unplugged");

    let topic = publish::rfid_topic("machine1", ReaderPosition::Travel);
    let (tx, rx) = mpsc::channel(8);
    let collector = CollectingPublisher::new();
    let forwarder = tokio::spawn(publish::forward(rx, collector.clone()));

    let poller = RfidPoller::new("travel", RfidDecoder::new(WINDOW), channel, tx, topic);
    let err = poller.run(ShutdownFlag::new()).await.unwrap_err();
    assert!(err.is_fatal());

    assert_eq!(forwarder.await.unwrap().unwrap(), 2);
    let messages = collector.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.topic == "rfid/machine1/travel"));
    assert_eq!(messages[0].payload, "E2 00 00 17 22 0F 01 64 17 50 5E 8A");
    assert_eq!(messages[1].payload, "BB 01 FF 00 01 15 16 7E");
}
