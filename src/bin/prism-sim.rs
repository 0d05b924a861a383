//! Simulated Prism wallbox publishing to a real broker.
//!
//! Usage:
//!   cargo run --bin prism-sim
//!   cargo run --bin prism-sim -- --period 2 --count 30
//!
//! Publishes the same topics a wallbox does, so the bridge (or any other
//! MQTT consumer) can be tested without hardware. Stop publishing to watch
//! the bridge expire the readings.

use clap::Parser;
use log::{info, warn};
use std::time::Duration;
use tokio::sync::oneshot;

use prism_sensor_bridge::config::{self, Config};
use prism_sensor_bridge::input::mqtt::MqttTransport;
use prism_sensor_bridge::input::simulation::WallboxSimulator;
use prism_sensor_bridge::sensors::descriptors::join_topic;

/// How long to wait for the broker before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "prism-sim")]
#[command(about = "Publish simulated Prism wallbox readings")]
struct Cli {
    /// Seconds between updates
    #[arg(long, default_value_t = 5)]
    period: u64,

    /// Stop after this many updates (runs until Ctrl+C when omitted)
    #[arg(long)]
    count: Option<u64>,

    /// Charge current the simulated user selected, in amps
    #[arg(long, default_value_t = 16)]
    amps: u32,

    /// Topic prefix to publish under
    #[arg(long, env = "PRISM_TOPIC_PREFIX", default_value = "prism")]
    prefix: String,
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    config::load_dotenv();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    config.mqtt.client_id = format!("{}-sim", config.mqtt.client_id);

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    let (transport, event_loop) = MqttTransport::new(&config.mqtt);
    let (connected_tx, connected_rx) = oneshot::channel();
    let mqtt_handle = tokio::spawn(event_loop.run(Some(connected_tx)));

    match tokio::time::timeout(CONNECT_TIMEOUT, connected_rx).await {
        Ok(Ok(())) => info!("Connected"),
        Ok(Err(_)) => {
            warn!("MQTT event loop ended before connecting");
            return;
        }
        Err(_) => {
            warn!("No connection to the broker after {:?}, giving up", CONNECT_TIMEOUT);
            mqtt_handle.abort();
            return;
        }
    }

    let period = Duration::from_secs(cli.period.max(1));
    let mut simulator = WallboxSimulator::new(cli.amps);
    let mut interval = tokio::time::interval(period);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for (topic, payload) in simulator.step(period) {
                    let topic = join_topic(&cli.prefix, topic);
                    if let Err(e) = transport.publish(&topic, &payload).await {
                        warn!("Failed to publish {}: {}", topic, e);
                    }
                }
                info!(">>> Wallbox {}", simulator.state_label());

                sent += 1;
                if cli.count.is_some_and(|count| sent >= count) {
                    info!("Published {} update(s), stopping", sent);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    // Give the event loop a moment to flush queued publishes
    tokio::time::sleep(Duration::from_millis(500)).await;
    mqtt_handle.abort();
}
