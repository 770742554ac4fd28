use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type DeviceId = i64;

/// Vehicle telemetry sample as received from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TelemetrySample {
    pub device_id: DeviceId,
    #[serde(rename = "ts")]
    #[sqlx(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub fuel_level: f64,
    pub temperature: f64,
}

/// Subscriber role tag. Authentication happens upstream; the hub only filters on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "fuel_low_autonomy")]
    FuelLowAutonomy,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::FuelLowAutonomy => "fuel_low_autonomy",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fuel_low_autonomy" => Ok(AlertType::FuelLowAutonomy),
            other => Err(format!("unknown alert type '{}'", other)),
        }
    }
}

/// Structured alert body, stored as JSONB and sent as an encoded string on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub device_name: String,
    pub autonomy_minutes: f64,
    pub autonomy_hours: f64,
}

impl AlertPayload {
    pub fn new(device_name: String, autonomy_minutes: f64) -> Self {
        Self {
            device_name,
            autonomy_minutes: round2(autonomy_minutes),
            autonomy_hours: round2(autonomy_minutes / 60.0),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Alert about to be persisted
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub device_id: DeviceId,
    pub alert_type: AlertType,
    pub timestamp: DateTime<Utc>,
    pub payload: AlertPayload,
}

/// Persisted alert record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub device_id: DeviceId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub payload: AlertPayload,
    #[serde(rename = "ack")]
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

/// REST API response wrapper for samples
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub data: Vec<TelemetrySample>,
    pub total: usize,
    pub limit: usize,
}

/// REST API response wrapper for alerts
#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub data: Vec<Alert>,
    pub total: usize,
    pub limit: usize,
}
