use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire shape accepted by the ingestor on `telemetry/<device_id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: i64,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub fuel_level: f64,
    pub temperature: f64,
}
