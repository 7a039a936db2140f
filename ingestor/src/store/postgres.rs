use super::TelemetryStore;
use crate::errors::{Error, Result};
use crate::model::{Device, NewDevice, NewReading, ReadingQuery, SensorReading};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{info, warn};

const DEVICE_COLUMNS: &str = "id, device_id, name, location, description, created_at";
const READING_COLUMNS: &str =
    "id, device_id, temperature_c, pressure_bar, vibration_mm_s, ts, ingested_at, source_topic";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Postgres-backed store. The pool is shared by ingestion and the REST API.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self::new(make_pool(database_url, max_connections).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn insert_device_if_absent(&self, device: &NewDevice) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (device_id, name, location, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id) DO NOTHING
            "#,
        )
        .bind(&device.device_id)
        .bind(&device.name)
        .bind(&device.location)
        .bind(&device.description)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_device(&self, device: &NewDevice) -> Result<Device> {
        let query = format!(
            "INSERT INTO devices (device_id, name, location, description) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            DEVICE_COLUMNS
        );

        sqlx::query_as::<_, Device>(&query)
            .bind(&device.device_id)
            .bind(&device.name)
            .bind(&device.location)
            .bind(&device.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    Error::Conflict(format!("device_id {} already exists", device.device_id))
                }
                other => Error::Database(other),
            })
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let query = format!("SELECT {} FROM devices WHERE device_id = $1", DEVICE_COLUMNS);
        let device = sqlx::query_as::<_, Device>(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let query = format!(
            "SELECT {} FROM devices ORDER BY created_at DESC, id DESC",
            DEVICE_COLUMNS
        );
        let devices = sqlx::query_as::<_, Device>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<SensorReading> {
        let query = format!(
            "INSERT INTO sensor_data \
             (device_id, temperature_c, pressure_bar, vibration_mm_s, ts, source_topic) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            READING_COLUMNS
        );

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, SensorReading>(&query)
            .bind(&reading.device_id)
            .bind(reading.temperature_c)
            .bind(reading.pressure_bar)
            .bind(reading.vibration_mm_s)
            .bind(reading.ts)
            .bind(&reading.source_topic)
            .fetch_one(&mut *tx)
            .await;

        match inserted {
            Ok(row) => {
                tx.commit().await?;
                Ok(row)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed insert also failed");
                }
                Err(e.into())
            }
        }
    }

    async fn list_readings(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM sensor_data WHERE TRUE", READING_COLUMNS));

        if let Some(device_id) = &query.device_id {
            builder.push(" AND device_id = ").push_bind(device_id.clone());
        }
        if let Some(from) = query.ts_from {
            builder.push(" AND ts >= ").push_bind(from);
        }
        if let Some(to) = query.ts_to {
            builder.push(" AND ts <= ").push_bind(to);
        }
        builder
            .push(" ORDER BY ts DESC, id DESC LIMIT ")
            .push_bind(query.effective_limit());

        let readings = builder
            .build_query_as::<SensorReading>()
            .fetch_all(&self.pool)
            .await?;
        Ok(readings)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Connection-level failures worth distinguishing in logs from bad statements.
pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(is_transient_error(&sqlx::Error::PoolTimedOut));
        assert!(is_transient_error(&sqlx::Error::PoolClosed));
        assert!(!is_transient_error(&sqlx::Error::RowNotFound));
    }
}
