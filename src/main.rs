//! Prism wallbox sensor bridge.
//!
//! Usage:
//!   cargo run --bin prism-bridge
//!   cargo run --bin prism-bridge -- --simulate
//!
//! Connects to the MQTT broker the wallbox publishes to, tracks every
//! declared sensor and logs state changes until Ctrl+C.

use clap::Parser;
use log::{error, info, warn};
use prism_sensor_bridge::config::{self, Config};
use prism_sensor_bridge::error::Result;
use prism_sensor_bridge::input::mqtt::MqttTransport;
use prism_sensor_bridge::input::simulation::run_wallbox_simulation;
use prism_sensor_bridge::input::{MemoryTransport, Transport};
use prism_sensor_bridge::integration::WallboxIntegration;
use prism_sensor_bridge::sensors::{
    ChangeNotifier, SensorDescription, StateChange, load_sensor_table, prism_sensors,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long to wait for the broker before attaching anyway.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "prism-bridge")]
#[command(about = "Track Prism wallbox sensors published over MQTT")]
struct Cli {
    /// Use an in-process simulated wallbox instead of the broker
    #[arg(long)]
    simulate: bool,

    /// Seconds between simulated wallbox updates
    #[arg(long, default_value_t = 5)]
    sim_period: u64,

    /// JSON sensor table replacing the built-in one
    #[arg(long, env = "PRISM_SENSOR_TABLE")]
    sensors: Option<PathBuf>,

    /// Topic prefix the wallbox publishes under
    #[arg(long, env = "PRISM_TOPIC_PREFIX")]
    prefix: Option<String>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    config::load_dotenv();
    init_logger();
    info!("Starting Prism sensor bridge");

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(prefix) = &cli.prefix {
        config.prism.topic_prefix = prefix.trim_end_matches('/').to_string();
    }
    if let Some(path) = &cli.sensors {
        config.prism.sensor_table = Some(path.clone());
    }

    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Topic prefix: {}", config.prism.topic_prefix);
    info!(
        "  Default expiry: {}s",
        config.prism.default_expire_after_secs
    );

    if let Err(e) = run(&cli, config).await {
        error!("Bridge stopped with error: {}", e);
        std::process::exit(1);
    }

    info!("Prism sensor bridge stopped");
}

async fn run(cli: &Cli, config: Config) -> Result<()> {
    let table = match &config.prism.sensor_table {
        Some(path) => {
            info!("Loading sensor table from {}", path.display());
            load_sensor_table(path)?
        }
        None => prism_sensors(),
    };

    let (notifier, changes) = ChangeNotifier::channel();
    let mut background: Vec<JoinHandle<()>> = vec![spawn_change_logger(&table, changes)];

    let memory = cli.simulate.then(|| Arc::new(MemoryTransport::new()));
    let transport: Arc<dyn Transport> = match &memory {
        Some(memory) => {
            info!("Simulation mode: no broker connection");
            memory.clone()
        }
        None => {
            let (mqtt, event_loop) = MqttTransport::new(&config.mqtt);
            let (connected_tx, connected_rx) = oneshot::channel();
            background.push(tokio::spawn(event_loop.run(Some(connected_tx))));

            match tokio::time::timeout(CONNECT_TIMEOUT, connected_rx).await {
                Ok(Ok(())) => info!("[MQTT] Connection established"),
                Ok(Err(_)) => warn!("[MQTT] Connection signal channel dropped"),
                Err(_) => warn!(
                    "[MQTT] No connection after {:?}, subscriptions will be sent on connect",
                    CONNECT_TIMEOUT
                ),
            }
            Arc::new(mqtt)
        }
    };

    let mut integration =
        WallboxIntegration::new(&config.prism, table, transport, Arc::new(notifier));
    integration.attach_all().await?;

    if let Some(memory) = memory {
        background.push(run_wallbox_simulation(
            memory,
            config.prism.topic_prefix.clone(),
            Duration::from_secs(cli.sim_period.max(1)),
        ));
    }

    info!("Prism sensor bridge is running");
    info!("  - {} sensor(s) attached", integration.sensors().len());
    info!("  - Press Ctrl+C to exit");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    let result = integration.detach_all().await;
    for (key, reading) in integration.snapshot() {
        info!("  {} = {:?}", key, reading.value);
    }

    for task in background {
        task.abort();
    }
    result
}

/// Log every state change with the sensor's unit and precision.
fn spawn_change_logger(
    table: &[SensorDescription],
    mut changes: mpsc::UnboundedReceiver<StateChange>,
) -> JoinHandle<()> {
    let formats: HashMap<String, (Option<String>, Option<u8>)> = table
        .iter()
        .map(|d| (d.key.clone(), (d.unit.clone(), d.display_precision)))
        .collect();

    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            let (unit, precision) = formats
                .get(&change.key)
                .cloned()
                .unwrap_or((None, None));
            info!(
                "[Sensor] {} = {}",
                change.key,
                change.reading.display(unit.as_deref(), precision)
            );
        }
    })
}
