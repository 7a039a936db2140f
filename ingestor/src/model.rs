use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin label stored with readings submitted through the REST API.
pub const MANUAL_SOURCE: &str = "rest/manual";

/// Column widths of `devices.device_id` and `sensor_data.source_topic`, in characters.
pub const DEVICE_ID_MAX_LEN: usize = 64;
pub const SOURCE_TOPIC_MAX_LEN: usize = 255;

/// A registered (or auto-registered) telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub name: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload for administrative device registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewDevice {
    /// Row created the first time telemetry arrives for an unknown device.
    pub fn auto_registered(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            name: format!("Auto-registered {}", device_id),
            location: None,
            description: Some("Created automatically from MQTT ingestion.".to_string()),
        }
    }
}

/// One persisted telemetry sample. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorReading {
    pub id: i64,
    pub device_id: String,
    pub temperature_c: Option<f64>,
    pub pressure_bar: Option<f64>,
    pub vibration_mm_s: Option<f64>,
    pub ts: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub source_topic: Option<String>,
}

/// A reading ready to be written; id and ingestion time are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub device_id: String,
    pub temperature_c: Option<f64>,
    pub pressure_bar: Option<f64>,
    pub vibration_mm_s: Option<f64>,
    pub ts: DateTime<Utc>,
    pub source_topic: String,
}

/// Typed payload accepted by the direct ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualReading {
    pub device_id: String,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub pressure_bar: Option<f64>,
    #[serde(default)]
    pub vibration_mm_s: Option<f64>,
    pub ts: DateTime<Utc>,
}

/// Filters for reading retrieval. Results are ordered newest event first.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReadingQuery {
    pub device_id: Option<String>,
    pub ts_from: Option<DateTime<Utc>>,
    pub ts_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl ReadingQuery {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn for_device(device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..Self::default()
        }
    }
}
