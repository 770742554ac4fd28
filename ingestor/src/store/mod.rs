//! Storage seams consumed by the ingestion and alerting paths

pub mod memory;

use crate::errors::Result;
use crate::model::{Alert, DeviceId, NewAlert, TelemetrySample};
use async_trait::async_trait;

/// Raw telemetry persistence
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Persist one sample
    async fn create(&self, sample: &TelemetrySample) -> Result<()>;

    /// Most recent samples for a device, newest first
    async fn recent_by_device(&self, device_id: DeviceId, limit: usize) -> Result<Vec<TelemetrySample>>;
}

/// Alert bookkeeping
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a new alert and return the stored record
    async fn create(&self, alert: NewAlert) -> Result<Alert>;

    /// Unacknowledged alerts, newest first
    async fn unacknowledged(&self, limit: usize) -> Result<Vec<Alert>>;

    /// Mark an alert as acknowledged; `NotFound` if it does not exist
    async fn acknowledge(&self, id: i64) -> Result<()>;
}

/// Display-name lookup for devices
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn display_name(&self, device_id: DeviceId) -> Result<String>;
}
