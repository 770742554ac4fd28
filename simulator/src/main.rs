mod telemetry;
mod vehicle;

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use vehicle::Vehicle;

/// Publishes simulated fleet telemetry to the ingestor over MQTT
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Number of vehicles
    #[arg(long, env = "DEVICES", default_value_t = 20)]
    devices: i64,

    /// Wall-clock seconds between fleet-wide reports
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 2)]
    interval_secs: u64,

    /// Simulated minutes that pass per report
    #[arg(long, env = "MINUTES_PER_TICK", default_value_t = 1.0)]
    minutes_per_tick: f64,

    /// Share of vehicles that burn fuel fast enough to alert
    #[arg(long, env = "HEAVY_SHARE", default_value_t = 0.1)]
    heavy_share: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting fleet simulator");
    info!(
        "Broker: {}:{}, Devices: {}, Interval: {}s, {} simulated min/tick",
        args.broker, args.port, args.devices, args.interval_secs, args.minutes_per_tick
    );

    let mut rng = rand::thread_rng();
    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    let heavy_share = args.heavy_share.clamp(0.0, 1.0);
    let mut fleet: Vec<Vehicle> = (1..=args.devices.max(1))
        .map(|id| Vehicle::new(&mut rng, id, heavy_share))
        .collect();

    // Simulated clock starts in the past so each tick advances it by whole minutes
    let tick = ChronoDuration::milliseconds((args.minutes_per_tick * 60_000.0) as i64);
    let mut sim_now = Utc::now() - tick * 60;
    let mut published = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));

    info!("Connected to MQTT broker, starting to publish telemetry");

    loop {
        ticker.tick().await;
        sim_now = (sim_now + tick).min(Utc::now());

        for vehicle in fleet.iter_mut() {
            let sample = vehicle.step(&mut rng, args.minutes_per_tick, sim_now);
            let topic = format!("telemetry/{}", sample.device_id);
            let payload = match serde_json::to_string(&sample) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize telemetry: {}", e);
                    continue;
                }
            };

            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => published += 1,
                Err(e) => warn!("Failed to publish: {}", e),
            }
        }

        if published % 1000 < fleet.len() as u64 {
            info!("Published {} samples", published);
        }
    }
}
