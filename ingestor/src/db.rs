use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{Alert, AlertPayload, DeviceId, NewAlert, TelemetrySample};
use crate::store::{AlertStore, DeviceDirectory, TelemetryStore};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{error, info};

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Postgres-backed telemetry, alert and device stores
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Counts and logs a failed statement before handing the error back
fn db_failure(op: &str, err: sqlx::Error) -> Error {
    DB_FAILURES_TOTAL.inc();
    error!("Database {} failed: {}", op, err);
    Error::Database(err)
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    let alert_type: String = row.try_get("type")?;
    let payload: Json<AlertPayload> = row.try_get("payload")?;
    Ok(Alert {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        alert_type: alert_type.parse().map_err(Error::Validation)?,
        timestamp: row.try_get("ts")?,
        payload: payload.0,
        acknowledged: row.try_get("ack")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn create(&self, sample: &TelemetrySample) -> Result<()> {
        let query = r#"
            INSERT INTO telemetry (device_id, ts, lat, lng, speed, fuel_level, temperature)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#;

        sqlx::query(query)
            .bind(sample.device_id)
            .bind(sample.timestamp)
            .bind(sample.lat)
            .bind(sample.lng)
            .bind(sample.speed)
            .bind(sample.fuel_level)
            .bind(sample.temperature)
            .execute(&self.pool)
            .await
            .map_err(|e| db_failure("telemetry insert", e))?;

        Ok(())
    }

    async fn recent_by_device(&self, device_id: DeviceId, limit: usize) -> Result<Vec<TelemetrySample>> {
        let query = r#"
            SELECT device_id, ts, lat, lng, speed, fuel_level, temperature
            FROM telemetry
            WHERE device_id = $1
            ORDER BY ts DESC
            LIMIT $2
            "#;

        sqlx::query_as::<_, TelemetrySample>(query)
            .bind(device_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_failure("telemetry query", e))
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn create(&self, alert: NewAlert) -> Result<Alert> {
        let query = r#"
            INSERT INTO alerts (device_id, ts, type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id, device_id, ts, type, payload, ack, created_at
            "#;

        let row = sqlx::query(query)
            .bind(alert.device_id)
            .bind(alert.timestamp)
            .bind(alert.alert_type.as_str())
            .bind(Json(&alert.payload))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_failure("alert insert", e))?;

        alert_from_row(&row)
    }

    async fn unacknowledged(&self, limit: usize) -> Result<Vec<Alert>> {
        let query = r#"
            SELECT id, device_id, ts, type, payload, ack, created_at
            FROM alerts
            WHERE ack = false
            ORDER BY ts DESC
            LIMIT $1
            "#;

        let rows = sqlx::query(query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_failure("alert query", e))?;

        rows.iter().map(alert_from_row).collect()
    }

    async fn acknowledge(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE alerts SET ack = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_failure("alert acknowledge", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("alert {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDirectory for PgStore {
    async fn display_name(&self, device_id: DeviceId) -> Result<String> {
        let name: Option<String> = sqlx::query_scalar("SELECT external_id FROM devices WHERE id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_failure("device lookup", e))?;

        name.ok_or_else(|| Error::NotFound(format!("device {}", device_id)))
    }
}
