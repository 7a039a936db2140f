use super::TelemetryStore;
use crate::errors::{Error, Result};
use crate::model::{Device, NewDevice, NewReading, ReadingQuery, SensorReading};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    devices: Vec<Device>,
    readings: Vec<SensorReading>,
    next_device_id: i64,
    next_reading_id: i64,
}

/// In-process store with the same uniqueness and ordering rules as [`super::PgStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_reading_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent reading inserts fail as if the database were unreachable.
    pub fn set_fail_reading_inserts(&self, fail: bool) {
        self.fail_reading_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn device_count(&self) -> usize {
        self.tables.lock().await.devices.len()
    }

    pub async fn reading_count(&self) -> usize {
        self.tables.lock().await.readings.len()
    }
}

impl Tables {
    fn push_device(&mut self, device: &NewDevice) -> Device {
        self.next_device_id += 1;
        let row = Device {
            id: self.next_device_id,
            device_id: device.device_id.clone(),
            name: device.name.clone(),
            location: device.location.clone(),
            description: device.description.clone(),
            created_at: Utc::now(),
        };
        self.devices.push(row.clone());
        row
    }

    fn has_device(&self, device_id: &str) -> bool {
        self.devices.iter().any(|d| d.device_id == device_id)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_device_if_absent(&self, device: &NewDevice) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.has_device(&device.device_id) {
            return Ok(false);
        }
        tables.push_device(device);
        Ok(true)
    }

    async fn create_device(&self, device: &NewDevice) -> Result<Device> {
        let mut tables = self.tables.lock().await;
        if tables.has_device(&device.device_id) {
            return Err(Error::Conflict(format!(
                "device_id {} already exists",
                device.device_id
            )));
        }
        Ok(tables.push_device(device))
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let tables = self.tables.lock().await;
        let mut devices = tables.devices.clone();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(devices)
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<SensorReading> {
        if self.fail_reading_inserts.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolClosed));
        }

        let mut tables = self.tables.lock().await;
        tables.next_reading_id += 1;
        let row = SensorReading {
            id: tables.next_reading_id,
            device_id: reading.device_id.clone(),
            temperature_c: reading.temperature_c,
            pressure_bar: reading.pressure_bar,
            vibration_mm_s: reading.vibration_mm_s,
            ts: reading.ts,
            ingested_at: Utc::now(),
            source_topic: Some(reading.source_topic.clone()),
        };
        tables.readings.push(row.clone());
        Ok(row)
    }

    async fn list_readings(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>> {
        let tables = self.tables.lock().await;
        let mut readings: Vec<SensorReading> = tables
            .readings
            .iter()
            .filter(|r| query.device_id.as_deref().map_or(true, |id| r.device_id == id))
            .filter(|r| query.ts_from.map_or(true, |from| r.ts >= from))
            .filter(|r| query.ts_to.map_or(true, |to| r.ts <= to))
            .cloned()
            .collect();
        readings.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.id.cmp(&a.id)));
        readings.truncate(query.effective_limit().max(0) as usize);
        Ok(readings)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
