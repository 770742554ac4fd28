//! In-memory stores for development and testing

use super::{AlertStore, DeviceDirectory, TelemetryStore};
use crate::errors::{Error, Result};
use crate::model::{Alert, DeviceId, NewAlert, TelemetrySample};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    samples: Arc<RwLock<HashMap<DeviceId, Vec<TelemetrySample>>>>,
    alerts: Arc<RwLock<Vec<Alert>>>,
    devices: Arc<RwLock<HashMap<DeviceId, String>>>,
    alert_sequence: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device display name
    #[cfg(test)]
    pub async fn register_device(&self, device_id: DeviceId, name: impl Into<String>) {
        self.devices.write().await.insert(device_id, name.into());
    }

    /// Every alert ever stored, acknowledged or not
    #[cfg(test)]
    pub async fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn create(&self, sample: &TelemetrySample) -> Result<()> {
        let mut samples = self.samples.write().await;
        let series = samples.entry(sample.device_id).or_default();
        // Kept sorted by timestamp ascending; equal timestamps keep arrival order
        let pos = series.partition_point(|s| s.timestamp <= sample.timestamp);
        series.insert(pos, sample.clone());
        Ok(())
    }

    async fn recent_by_device(&self, device_id: DeviceId, limit: usize) -> Result<Vec<TelemetrySample>> {
        let samples = self.samples.read().await;
        Ok(samples
            .get(&device_id)
            .map(|series| series.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn create(&self, alert: NewAlert) -> Result<Alert> {
        let id = self.alert_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = Alert {
            id,
            device_id: alert.device_id,
            alert_type: alert.alert_type,
            timestamp: alert.timestamp,
            payload: alert.payload,
            acknowledged: false,
            created_at: Utc::now(),
        };
        self.alerts.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn unacknowledged(&self, limit: usize) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        let mut pending: Vec<Alert> = alerts.iter().filter(|a| !a.acknowledged).cloned().collect();
        pending.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn acknowledge(&self, id: i64) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                Ok(())
            }
            None => Err(Error::NotFound(format!("alert {}", id))),
        }
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryStore {
    async fn display_name(&self, device_id: DeviceId) -> Result<String> {
        self.devices
            .read()
            .await
            .get(&device_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("device {}", device_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertPayload, AlertType};
    use chrono::{Duration, TimeZone};

    fn sample(device_id: DeviceId, minute: i64, fuel: f64) -> TelemetrySample {
        TelemetrySample {
            device_id,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minute),
            lat: 0.0,
            lng: 0.0,
            speed: 0.0,
            fuel_level: fuel,
            temperature: 20.0,
        }
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            // Out-of-order arrival
            for minute in [5, 1, 3, 2, 4] {
                TelemetryStore::create(&store, &sample(1, minute, 50.0)).await.unwrap();
            }
            TelemetryStore::create(&store, &sample(2, 9, 50.0)).await.unwrap();

            let recent = store.recent_by_device(1, 3).await.unwrap();
            let minutes: Vec<i64> = recent
                .iter()
                .map(|s| (s.timestamp - sample(1, 0, 0.0).timestamp).num_minutes())
                .collect();
            assert_eq!(minutes, vec![5, 4, 3]);
            assert!(store.recent_by_device(3, 10).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_alert_acknowledge_cycle() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let created = AlertStore::create(
                &store,
                NewAlert {
                    device_id: 4,
                    alert_type: AlertType::FuelLowAutonomy,
                    timestamp: Utc::now(),
                    payload: AlertPayload::new("Device-4".to_string(), 12.0),
                },
            )
            .await
            .unwrap();

            assert_eq!(store.unacknowledged(10).await.unwrap().len(), 1);
            store.acknowledge(created.id).await.unwrap();
            assert!(store.unacknowledged(10).await.unwrap().is_empty());
            assert!(matches!(store.acknowledge(999).await, Err(Error::NotFound(_))));
        });
    }

    #[test]
    fn test_unknown_device_name_is_error() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            store.register_device(1, "TRUCK-01").await;
            assert_eq!(store.display_name(1).await.unwrap(), "TRUCK-01");
            assert!(store.display_name(2).await.is_err());
        });
    }
}
