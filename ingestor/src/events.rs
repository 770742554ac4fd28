//! Wire payloads for the `telemetry` and `alert` channels, and detached publishing

use crate::analyzer::FuelAssessment;
use crate::hub::HubHandle;
use crate::model::{Alert, DeviceId, Role, TelemetrySample};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

pub const TELEMETRY_CHANNEL: &str = "telemetry";
pub const ALERT_CHANNEL: &str = "alert";

pub const TELEMETRY_ROLES: &[Role] = &[Role::Admin, Role::User];
pub const ALERT_ROLES: &[Role] = &[Role::Admin];

const RESOLVED_TYPE: &str = "fuel_low_autonomy_resolved";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn telemetry_event(sample: &TelemetrySample) -> (Value, Value) {
    let data = json!({
        "device_id": sample.device_id,
        "lat": sample.lat,
        "lng": sample.lng,
        "speed": sample.speed,
        "fuel": sample.fuel_level,
        "temperature": sample.temperature,
        "ts": sample.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    });
    let meta = json!({
        "timestamp": now_rfc3339(),
        "source": "SensorService",
    });
    (data, meta)
}

pub fn alert_event(alert: &Alert) -> (Value, Value) {
    let timestamp = alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    // The payload travels as an encoded JSON string
    let payload = serde_json::to_string(&alert.payload).unwrap_or_default();
    let data = json!({
        "type": alert.alert_type.as_str(),
        "device_id": alert.device_id,
        "timestamp": timestamp,
        "payload": payload,
        "message": "Critical fuel level detected",
        "id": alert.id,
    });
    let meta = json!({
        "timestamp": timestamp,
        "source": "AlertService",
        "severity": "critical",
    });
    (data, meta)
}

pub fn resolution_event(device_id: DeviceId, assessment: &FuelAssessment) -> (Value, Value) {
    let timestamp = now_rfc3339();
    let data = json!({
        "type": RESOLVED_TYPE,
        "device_id": device_id,
        "timestamp": timestamp,
        "autonomy_minutes": (assessment.autonomy_minutes * 100.0).round() / 100.0,
        "message": "Fuel level back to normal",
    });
    let meta = json!({
        "timestamp": timestamp,
        "source": "AlertService",
        "severity": "info",
    });
    (data, meta)
}

/// Publishes from a detached task. The caller gets no delivery result.
///
/// Each call spawns its own task, so frames from separate calls have no
/// ordering guarantee: an `alert` frame may reach a subscriber before the
/// `telemetry` frame of the sample that raised it. Subscribers that need
/// ordering should sort on `data.ts` / `data.timestamp`.
pub fn spawn_publish(hub: &HubHandle, channel: &'static str, event: (Value, Value), roles: &'static [Role]) {
    let hub = hub.clone();
    let (data, meta) = event;
    tokio::spawn(async move {
        hub.publish(channel, data, meta, roles);
    });
}
