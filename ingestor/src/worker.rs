use crate::alerting::Transition;
use crate::model::TelemetrySample;
use crate::service::SensorService;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Feeds samples from the MQTT intake into the ingestion path, one at a
/// time, so per-device arrival order is preserved.
pub async fn run_ingest_worker(mut rx: mpsc::Receiver<TelemetrySample>, service: Arc<SensorService>) {
    info!("Starting ingest worker");

    let mut processed: u64 = 0;
    while let Some(sample) = rx.recv().await {
        let device_id = sample.device_id;
        match service.ingest_sample(sample).await {
            Ok(Transition::Raised(alert)) => {
                debug!("Device {} raised alert {}", device_id, alert.id);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to ingest sample for device {}: {}", device_id, e);
            }
        }

        processed += 1;
        if processed % 10_000 == 0 {
            info!("Ingest worker processed {} samples", processed);
        }
    }

    info!("Channel closed, ingest worker stopped after {} samples", processed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertConfig;
    use crate::service::tests::{reading, service_with};
    use crate::store::memory::InMemoryStore;
    use crate::store::TelemetryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_drains_channel_then_stops() {
        let store = Arc::new(InMemoryStore::new());
        let (service, _hub) = service_with(
            store.clone(),
            store.clone(),
            AlertConfig {
                debounce: Duration::ZERO,
                notify_resolution: false,
            },
        );

        let (tx, rx) = mpsc::channel(16);
        let worker = tokio::spawn(run_ingest_worker(rx, Arc::new(service)));

        tx.send(reading(2, 90.0, 20)).await.unwrap();
        tx.send(reading(2, 89.0, 10)).await.unwrap();
        // Rejected by validation, the worker keeps going
        tx.send(reading(2, 250.0, 5)).await.unwrap();
        tx.send(reading(2, 88.0, 0)).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.recent_by_device(2, 10).await.unwrap().len(), 3);
    }
}
