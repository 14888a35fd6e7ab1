use std::io::Write;

use agv_sensor_bridge::config::{AppConfig, ConfigError};
use agv_sensor_bridge::publish::ReaderPosition;

const CONFIG: &str = r#"{
    "MACHINE_ID": "oht7",
    "MQTT_BROKER": { "IP": "10.0.0.5", "PORT": 1884, "CLIENT_ID": "bridge-7" },
    "RFID": {
        "FRONT": { "ENABLED": true, "PORT": "/dev/ttyUSB1", "BAUDRATE": 115200,
                   "TIMEOUT_MS": 250, "COMMAND": "BB 00 22 00 00 22 7E" }
    },
    "PGV": { "ENABLED": true, "PORT": "/dev/ttyUSB0", "BAUDRATE": 115200 }
}"#;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = AppConfig::load(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.machine_id, "oht7");
    let mqtt = config.mqtt_settings();
    assert_eq!(mqtt.host, "10.0.0.5");
    assert_eq!(mqtt.port, 1884);
    assert_eq!(mqtt.client_id, "bridge-7");

    let readers: Vec<_> = config.rfid.enabled().collect();
    assert_eq!(readers.len(), 1);
    assert_eq!(readers[0].0, ReaderPosition::Front);
    let settings = readers[0].1.serial_settings();
    assert_eq!(settings.port_name, "/dev/ttyUSB1");
    assert_eq!(settings.timeout.as_millis(), 250);

    let pgv = config.enabled_pgv().unwrap();
    assert_eq!(pgv.serial_settings().baud_rate, 115200);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load(dir.path().join("config.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_disabled_pgv_is_not_started() {
    let text = CONFIG.replace(r#""PGV": { "ENABLED": true"#, r#""PGV": { "ENABLED": false"#);
    let config = AppConfig::from_json_str(&text).unwrap();
    assert!(config.pgv.is_some());
    assert!(config.enabled_pgv().is_none());
}
