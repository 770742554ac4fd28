mod alerting;
mod analyzer;
mod config;
mod db;
mod errors;
mod events;
mod hub;
mod metrics;
mod model;
mod mqtt;
mod rest;
mod service;
mod store;
mod validate;
mod worker;
mod ws;

use alerting::{AlertStateMachine, AlertStateTable};
use axum::{routing::get, Router};
use config::{Config, StorageBackend};
use hub::Hub;
use service::SensorService;
use std::future::pending;
use std::sync::Arc;
use store::memory::InMemoryStore;
use store::{AlertStore, DeviceDirectory, TelemetryStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Stores = (
    Arc<dyn TelemetryStore>,
    Arc<dyn AlertStore>,
    Arc<dyn DeviceDirectory>,
);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting FuelWatch ingestor");
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Fuel model: {:?}, lookback {}, alert below {:.1}h, debounce {:?}",
        config.analyzer.model,
        config.analyzer.lookback,
        config.analyzer.alert_threshold_hours,
        config.alerting.debounce
    );

    metrics::init_metrics();

    let (telemetry, alerts, devices) = match open_stores(&config).await {
        Ok(stores) => stores,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let (hub, hub_task) = Hub::spawn(config.hub_queue_capacity);
    info!("Hub queue capacity: {}", config.hub_queue_capacity);

    let alert_machine = AlertStateMachine::new(
        telemetry.clone(),
        alerts.clone(),
        devices,
        hub.clone(),
        config.analyzer.clone(),
        config.alerting.clone(),
        AlertStateTable::new(),
    );
    let service = Arc::new(SensorService::new(telemetry, alerts, hub.clone(), alert_machine));

    // Bounded channel between the MQTT intake and the ingest worker
    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let worker_service = service.clone();
    let worker_handle = tokio::spawn(async move {
        worker::run_ingest_worker(rx, worker_service).await;
    });

    let mqtt_handle = if config.mqtt_enabled {
        info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
        let client_id = format!("fuelwatch-{}", uuid::Uuid::new_v4());
        let (broker, port) = (config.mqtt_broker.clone(), config.mqtt_port);
        let tx = tx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = mqtt::run_mqtt(broker, port, client_id, tx).await {
                error!("MQTT task failed: {}", e);
            }
        }))
    } else {
        warn!("MQTT intake disabled, accepting samples over HTTP only");
        None
    };
    // Held until shutdown so the worker keeps running without an MQTT intake
    let _intake_tx = tx;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(service))
        .merge(ws::create_router(hub));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = wait_optional(mqtt_handle) => {
            error!("MQTT task terminated");
        }
        _ = worker_handle => {
            error!("Ingest worker terminated");
        }
        _ = hub_task => {
            error!("Broadcast hub terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn open_stores(config: &Config) -> errors::Result<Stores> {
    match config.storage {
        StorageBackend::Postgres => {
            info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
            let pool = db::make_pool(&config.database_url).await?;
            let store = Arc::new(db::PgStore::new(pool));
            Ok(share(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Ok(share(Arc::new(InMemoryStore::new())))
        }
    }
}

fn share<S>(store: Arc<S>) -> Stores
where
    S: TelemetryStore + AlertStore + DeviceDirectory + 'static,
{
    let telemetry: Arc<dyn TelemetryStore> = store.clone();
    let alerts: Arc<dyn AlertStore> = store.clone();
    let devices: Arc<dyn DeviceDirectory> = store;
    (telemetry, alerts, devices)
}

async fn wait_optional(handle: Option<JoinHandle<()>>) {
    match handle {
        Some(handle) => {
            let _ = handle.await;
        }
        None => pending::<()>().await,
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
