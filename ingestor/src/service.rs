use crate::alerting::{AlertStateMachine, Transition};
use crate::errors::Result;
use crate::events::{self, TELEMETRY_CHANNEL, TELEMETRY_ROLES};
use crate::hub::HubHandle;
use crate::metrics::{INGEST_LATENCY_SECONDS, INVALID_SAMPLES_TOTAL, SAMPLES_TOTAL, VALID_SAMPLES_TOTAL};
use crate::model::{Alert, DeviceId, TelemetrySample};
use crate::store::{AlertStore, TelemetryStore};
use crate::validate::validate;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_ALERT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

/// Requested page size with the default applied, clamped to `1..=MAX_LIMIT`
pub fn effective_limit(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_LIMIT)
}

/// Entry point for new samples and the read paths behind the REST API
pub struct SensorService {
    telemetry: Arc<dyn TelemetryStore>,
    alerts: Arc<dyn AlertStore>,
    hub: HubHandle,
    alerting: AlertStateMachine,
}

impl SensorService {
    pub fn new(
        telemetry: Arc<dyn TelemetryStore>,
        alerts: Arc<dyn AlertStore>,
        hub: HubHandle,
        alerting: AlertStateMachine,
    ) -> Self {
        Self {
            telemetry,
            alerts,
            hub,
            alerting,
        }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Persists the sample, broadcasts it, then evaluates the device's fuel
    /// alert state. Only persistence and alert bookkeeping errors surface;
    /// the telemetry broadcast is fire-and-forget.
    pub async fn ingest_sample(&self, sample: TelemetrySample) -> Result<Transition> {
        SAMPLES_TOTAL.inc();
        let start = Instant::now();

        if let Err(e) = validate(&sample) {
            INVALID_SAMPLES_TOTAL.inc();
            return Err(e);
        }

        self.telemetry.create(&sample).await?;
        VALID_SAMPLES_TOTAL.inc();

        events::spawn_publish(
            &self.hub,
            TELEMETRY_CHANNEL,
            events::telemetry_event(&sample),
            TELEMETRY_ROLES,
        );

        let result = self.alerting.evaluate(sample.device_id).await;
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        debug!("Ingested sample for device {}: {:?}", sample.device_id, result);
        result
    }

    /// Recent samples, newest first; `None` when there are fewer than two
    pub async fn recent_samples(&self, device_id: DeviceId, limit: Option<usize>) -> Result<Option<Vec<TelemetrySample>>> {
        let limit = effective_limit(limit, DEFAULT_RECENT_LIMIT);
        let recent = self.telemetry.recent_by_device(device_id, limit).await?;
        if recent.len() < 2 {
            return Ok(None);
        }
        Ok(Some(recent))
    }

    pub async fn unacknowledged_alerts(&self, limit: Option<usize>) -> Result<Vec<Alert>> {
        let limit = effective_limit(limit, DEFAULT_ALERT_LIMIT);
        self.alerts.unacknowledged(limit).await
    }

    pub async fn acknowledge_alert(&self, id: i64) -> Result<()> {
        self.alerts.acknowledge(id).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alerting::{AlertConfig, AlertState, AlertStateTable};
    use crate::analyzer::AnalyzerConfig;
    use crate::errors::Error;
    use crate::hub::{Hub, Subscription, DEFAULT_QUEUE_CAPACITY};
    use crate::model::Role;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use std::time::Duration;

    pub(crate) fn service_with(
        telemetry: Arc<dyn TelemetryStore>,
        store: Arc<InMemoryStore>,
        config: AlertConfig,
    ) -> (SensorService, HubHandle) {
        let (hub, _task) = Hub::spawn(DEFAULT_QUEUE_CAPACITY);
        let machine = AlertStateMachine::new(
            telemetry.clone(),
            store.clone(),
            store.clone(),
            hub.clone(),
            AnalyzerConfig::default(),
            config,
            AlertStateTable::new(),
        );
        (SensorService::new(telemetry, store, hub.clone(), machine), hub)
    }

    pub(crate) fn reading(device_id: DeviceId, fuel: f64, minutes_ago: i64) -> TelemetrySample {
        TelemetrySample {
            device_id,
            timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
            lat: 10.2,
            lng: -70.3,
            speed: 45.0,
            fuel_level: fuel,
            temperature: 30.0,
        }
    }

    async fn drain(sub: &mut Subscription) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(200), sub.receiver.recv()).await {
            out.push(serde_json::from_str(&msg).unwrap());
        }
        out
    }

    fn no_debounce() -> AlertConfig {
        AlertConfig {
            debounce: Duration::ZERO,
            notify_resolution: false,
        }
    }

    #[tokio::test]
    async fn test_ingest_persists_and_broadcasts_telemetry() {
        let store = Arc::new(InMemoryStore::new());
        let (service, hub) = service_with(store.clone(), store.clone(), no_debounce());
        let mut user = hub.subscribe(Role::User);
        let mut admin = hub.subscribe(Role::Admin);
        hub.subscriber_count().await;

        let transition = service.ingest_sample(reading(1, 60.0, 0)).await.unwrap();
        assert_eq!(transition, Transition::Unchanged(AlertState::Normal));
        assert_eq!(store.recent_by_device(1, 10).await.unwrap().len(), 1);

        for sub in [&mut user, &mut admin] {
            let messages = drain(sub).await;
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0]["channel"], "telemetry");
            assert_eq!(messages[0]["data"]["fuel"], 60.0);
            assert_eq!(messages[0]["meta"]["source"], "SensorService");
        }
    }

    #[tokio::test]
    async fn test_draining_fleet_raises_one_alert() {
        let store = Arc::new(InMemoryStore::new());
        let (service, hub) = service_with(store.clone(), store.clone(), no_debounce());
        let mut admin = hub.subscribe(Role::Admin);
        let mut user = hub.subscribe(Role::User);
        hub.subscriber_count().await;

        let readings = [(100.0, 60), (80.0, 50), (60.0, 40), (40.0, 20), (20.0, 10), (10.0, 0)];
        let mut raised = 0;
        for (fuel, minutes_ago) in readings {
            if let Transition::Raised(_) = service.ingest_sample(reading(3, fuel, minutes_ago)).await.unwrap() {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
        assert_eq!(service.unacknowledged_alerts(None).await.unwrap().len(), 1);

        let admin_msgs = drain(&mut admin).await;
        let alerts = admin_msgs.iter().filter(|m| m["channel"] == "alert").count();
        let telemetry = admin_msgs.iter().filter(|m| m["channel"] == "telemetry").count();
        assert_eq!(alerts, 1);
        assert_eq!(telemetry, 6);

        let user_msgs = drain(&mut user).await;
        assert!(user_msgs.iter().all(|m| m["channel"] == "telemetry"));
        assert_eq!(user_msgs.len(), 6);
    }

    #[tokio::test]
    async fn test_invalid_sample_is_rejected_before_persisting() {
        let store = Arc::new(InMemoryStore::new());
        let (service, _hub) = service_with(store.clone(), store.clone(), no_debounce());

        let result = service.ingest_sample(reading(1, 140.0, 0)).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(store.recent_by_device(1, 10).await.unwrap().is_empty());
    }

    struct BrokenTelemetry;

    #[async_trait]
    impl TelemetryStore for BrokenTelemetry {
        async fn create(&self, _sample: &TelemetrySample) -> Result<()> {
            Err(Error::Store("disk full".to_string()))
        }

        async fn recent_by_device(&self, _device_id: DeviceId, _limit: usize) -> Result<Vec<TelemetrySample>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal_and_silent_on_the_wire() {
        let store = Arc::new(InMemoryStore::new());
        let (service, hub) = service_with(Arc::new(BrokenTelemetry), store, no_debounce());
        let mut user = hub.subscribe(Role::User);
        hub.subscriber_count().await;

        assert!(matches!(service.ingest_sample(reading(1, 50.0, 0)).await, Err(Error::Store(_))));
        assert!(drain(&mut user).await.is_empty());
    }

    #[tokio::test]
    async fn test_recent_samples_needs_two() {
        let store = Arc::new(InMemoryStore::new());
        let (service, _hub) = service_with(store.clone(), store.clone(), no_debounce());

        service.ingest_sample(reading(5, 70.0, 10)).await.unwrap();
        assert!(service.recent_samples(5, None).await.unwrap().is_none());

        service.ingest_sample(reading(5, 69.0, 0)).await.unwrap();
        let recent = service.recent_samples(5, Some(5000)).await.unwrap().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].fuel_level, 69.0);
    }

    #[tokio::test]
    async fn test_acknowledge_flow() {
        let store = Arc::new(InMemoryStore::new());
        let (service, _hub) = service_with(store.clone(), store.clone(), no_debounce());
        for (fuel, minutes_ago) in [(30.0, 20), (20.0, 10), (10.0, 0)] {
            service.ingest_sample(reading(9, fuel, minutes_ago)).await.unwrap();
        }

        let pending = service.unacknowledged_alerts(Some(10)).await.unwrap();
        assert_eq!(pending.len(), 1);
        service.acknowledge_alert(pending[0].id).await.unwrap();
        assert!(service.unacknowledged_alerts(None).await.unwrap().is_empty());
        assert!(matches!(service.acknowledge_alert(4242).await, Err(Error::NotFound(_))));
    }
}
