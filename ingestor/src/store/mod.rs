//! Persistence backends.
//!
//! Everything the pipeline and the REST API need from storage goes through
//! [`TelemetryStore`]. [`PgStore`] is the production backend; [`MemoryStore`]
//! keeps the same contract in process.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{is_transient_error, make_pool, PgStore};

use crate::errors::Result;
use crate::model::{Device, NewDevice, NewReading, ReadingQuery, SensorReading};
use async_trait::async_trait;

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Inserts the device unless a row with the same `device_id` exists.
    /// Returns `true` when this call created the row. Must be atomic.
    async fn insert_device_if_absent(&self, device: &NewDevice) -> Result<bool>;

    /// Inserts the device, failing with `Error::Conflict` if `device_id` is taken.
    async fn create_device(&self, device: &NewDevice) -> Result<Device>;

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>>;

    /// All devices, most recently created first.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Writes one reading in its own transaction.
    async fn insert_reading(&self, reading: &NewReading) -> Result<SensorReading>;

    /// Readings matching the query, newest event first.
    async fn list_readings(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>>;

    async fn health_check(&self) -> Result<()>;
}
