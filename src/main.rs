//! AGV sensor bridge
//!
//! Polls the PGV position head and the UHF RFID readers over their serial
//! ports and publishes what they report to an MQTT broker.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use agv_sensor_bridge::config::AppConfig;
use agv_sensor_bridge::pgv::{PgvHandle, PgvPoller};
use agv_sensor_bridge::publish::{self, LogPublisher, MqttPublisher, PublishMessage, Publisher};
use agv_sensor_bridge::rfid::RfidPoller;
use agv_sensor_bridge::serial::SerialInterface;
use agv_sensor_bridge::supervisor::Supervisor;

/// Messages buffered between the poll tasks and the publisher
const HANDOFF_CAPACITY: usize = 64;
/// How long the publisher may take to drain after the sensors stop
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// AGV sensor bridge - PGV and RFID serial readers to MQTT
#[derive(Parser, Debug)]
#[command(name = "agv-sensor-bridge")]
#[command(about = "Poll PGV and RFID sensors over serial and publish to MQTT", long_about = None)]
#[command(version)]
struct Args {
    /// Path to config.json
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Override MACHINE_ID from the config file
    #[arg(long, value_name = "ID")]
    machine_id: Option<String>,

    /// Override the MQTT broker host
    #[arg(long, value_name = "HOST")]
    mqtt_broker: Option<String>,

    /// Override the MQTT broker port
    #[arg(long, value_name = "PORT")]
    mqtt_port: Option<u16>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log messages instead of publishing them
    #[arg(long)]
    dry_run: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if args.list_ports {
        return list_ports();
    }

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(machine_id) = args.machine_id {
        config.machine_id = machine_id;
    }
    if let Some(host) = args.mqtt_broker {
        config.mqtt_broker.ip = host;
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt_broker.port = port;
    }
    config.validate().context("Invalid configuration")?;

    log::info!("Machine id: {}", config.machine_id);

    let publisher: Box<dyn Publisher> = if args.dry_run {
        log::info!("Dry run: messages are logged, not published");
        Box::new(LogPublisher)
    } else {
        let settings = config.mqtt_settings();
        Box::new(MqttPublisher::connect(&settings).context("Failed to create MQTT client")?)
    };

    let (tx, rx) = mpsc::channel::<PublishMessage>(HANDOFF_CAPACITY);
    let mut forwarder = tokio::spawn(publish::forward(rx, publisher));

    let mut supervisor = Supervisor::new();
    spawn_rfid_readers(&config, &mut supervisor, &tx)?;
    let pgv = spawn_pgv(&config, &mut supervisor, &tx)?;
    drop(tx);

    if supervisor.is_empty() {
        bail!("No sensor could be started; check ENABLED flags and port names");
    }
    log::info!("{} sensor task(s) running, press Ctrl-C to stop", supervisor.len());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            log::info!("Ctrl-C received");
        }
        _ = supervisor.wait_idle() => {
            log::warn!("Every sensor task has ended");
        }
    }

    let results = supervisor.shutdown().await;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut forwarder).await {
        Ok(Ok(Ok(count))) => log::debug!("Forwarder finished after {} message(s)", count),
        Ok(Ok(Err(e))) => log::error!("Forwarder failed: {}", e),
        Ok(Err(e)) => log::error!("Forwarder task panicked: {}", e),
        Err(_) => {
            log::warn!("Publisher still busy after {:?}, giving up", DRAIN_TIMEOUT);
            forwarder.abort();
        }
    }

    if let Some(handle) = pgv {
        match handle.latest() {
            Some(reading) => log::info!(
                "Last PGV reading: x={} y={} angle={} tag={}",
                reading.x,
                reading.y,
                reading.angle,
                reading.tag
            ),
            None => log::info!("No PGV reading was captured"),
        }
    }

    if failed > 0 {
        log::warn!("{} of {} sensor task(s) ended with an error", failed, results.len());
    }
    Ok(())
}

fn spawn_rfid_readers(
    config: &AppConfig,
    supervisor: &mut Supervisor,
    tx: &mpsc::Sender<PublishMessage>,
) -> Result<()> {
    for (position, reader) in config.rfid.enabled() {
        let decoder = reader
            .decoder()
            .with_context(|| format!("RFID {} reader", position))?;
        let interface = match SerialInterface::open(reader.serial_settings()) {
            Ok(interface) => interface,
            Err(e) => {
                log::error!("RFID {} reader unavailable: {}", position, e);
                continue;
            }
        };

        let topic = publish::rfid_topic(&config.machine_id, position);
        let poller = RfidPoller::new(position.as_str(), decoder, interface, tx.clone(), topic)
            .with_cycle_delay(reader.cycle_delay());
        supervisor.spawn(format!("rfid-{}", position), move |flag| poller.run(flag));
    }
    Ok(())
}

fn spawn_pgv(
    config: &AppConfig,
    supervisor: &mut Supervisor,
    tx: &mpsc::Sender<PublishMessage>,
) -> Result<Option<PgvHandle>> {
    let Some(pgv) = config.enabled_pgv() else {
        return Ok(None);
    };

    let decoder = pgv.decoder().context("PGV reader")?;
    let interface = match SerialInterface::open(pgv.serial_settings()) {
        Ok(interface) => interface,
        Err(e) => {
            log::error!("PGV unavailable: {}", e);
            return Ok(None);
        }
    };

    let (poller, handle) = PgvPoller::new(decoder, interface);
    let poller = poller
        .with_sink(tx.clone(), publish::pgv_topic(&config.machine_id))
        .with_cycle_delay(pgv.cycle_delay());
    supervisor.spawn("pgv", move |flag| poller.run(flag));
    Ok(Some(handle))
}

fn list_ports() -> Result<()> {
    let ports = SerialInterface::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04X}:{:04X}  {}",
                port.port_name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::{Builder, Env};
    use log::LevelFilter;
    use std::io::Write;

    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        Builder::from_env(Env::default())
    } else {
        let level = if quiet {
            LevelFilter::Error
        } else {
            match verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        };
        let mut builder = Builder::new();
        builder.filter_level(level);
        builder
    };

    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{} {}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
