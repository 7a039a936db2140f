//! One payload in, one reading out (or a typed reason why not).
//!
//! normalize -> detect anomalies -> ensure device -> persist

use crate::anomaly::detect_anomalies;
use crate::errors::{Error, Result};
use crate::metrics::{ANOMALIES_TOTAL, DROPPED_MESSAGES_TOTAL};
use crate::model::{
    ManualReading, NewReading, SensorReading, DEVICE_ID_MAX_LEN, MANUAL_SOURCE,
    SOURCE_TOPIC_MAX_LEN,
};
use crate::normalize::normalize_payload;
use crate::persist::persist_reading;
use crate::registry::ensure_device_exists;
use crate::store::TelemetryStore;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Where a payload came from. The label is stored with the reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Topic(String),
    Manual,
}

impl Origin {
    pub fn label(&self) -> &str {
        match self {
            Origin::Topic(topic) => topic,
            Origin::Manual => MANUAL_SOURCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InvalidEncoding,
    InvalidJson,
    NotAnObject,
    MissingDeviceId,
    DeviceIdTooLong,
    TopicTooLong,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::InvalidEncoding => "invalid_encoding",
            DropReason::InvalidJson => "invalid_json",
            DropReason::NotAnObject => "not_an_object",
            DropReason::MissingDeviceId => "missing_device_id",
            DropReason::DeviceIdTooLong => "device_id_too_long",
            DropReason::TopicTooLong => "topic_too_long",
        }
    }

    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            DropReason::InvalidEncoding | DropReason::InvalidJson | DropReason::NotAnObject
        )
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a reading for `device_id` from `origin` cannot be stored, if it can't.
fn unstorable(origin: &Origin, device_id: &str) -> Option<DropReason> {
    if device_id.is_empty() {
        Some(DropReason::MissingDeviceId)
    } else if device_id.chars().count() > DEVICE_ID_MAX_LEN {
        Some(DropReason::DeviceIdTooLong)
    } else if origin.label().chars().count() > SOURCE_TOPIC_MAX_LEN {
        Some(DropReason::TopicTooLong)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Persisted(SensorReading),
    Dropped(DropReason),
}

#[derive(Clone)]
pub struct IngestionCoordinator {
    store: Arc<dyn TelemetryStore>,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    /// Runs the pipeline for one decoded payload.
    ///
    /// A topic payload with a missing or oversized `device_id`, or an
    /// oversized topic, is dropped with a single warning.
    /// Anomalies are reported only for readings that were persisted.
    /// Registration and storage errors are returned to the caller.
    pub async fn ingest(&self, origin: &Origin, payload: &Map<String, Value>) -> Result<IngestOutcome> {
        let reading = detect_anomalies(normalize_payload(payload));

        if let Some(reason) = unstorable(origin, &reading.device_id) {
            return match origin {
                Origin::Topic(topic) => {
                    DROPPED_MESSAGES_TOTAL
                        .with_label_values(&[reason.as_str()])
                        .inc();
                    warn!(topic = %topic, reason = %reason, "Dropped message that cannot be stored");
                    Ok(IngestOutcome::Dropped(reason))
                }
                Origin::Manual => Err(Error::Validation(format!(
                    "device_id rejected: {}",
                    reason
                ))),
            };
        }

        ensure_device_exists(self.store.as_ref(), &reading.device_id).await?;

        let new_reading = NewReading {
            device_id: reading.device_id,
            temperature_c: reading.temperature_c,
            pressure_bar: reading.pressure_bar,
            vibration_mm_s: reading.vibration_mm_s,
            ts: reading.ts,
            source_topic: origin.label().to_string(),
        };
        let row = persist_reading(self.store.as_ref(), &new_reading).await?;

        if !reading.anomalies.is_empty() {
            for flag in &reading.anomalies {
                ANOMALIES_TOTAL.with_label_values(&[flag.as_str()]).inc();
            }
            let flags: Vec<&str> = reading.anomalies.iter().map(|f| f.as_str()).collect();
            warn!(
                device_id = %row.device_id,
                id = row.id,
                source = %origin.label(),
                anomalies = ?flags,
                "Anomalies detected"
            );
        }

        Ok(IngestOutcome::Persisted(row))
    }

    /// Direct-call path. The caller has already validated `reading`.
    pub async fn ingest_manual(&self, reading: &ManualReading) -> Result<SensorReading> {
        let Value::Object(payload) = serde_json::to_value(reading)? else {
            return Err(Error::Validation("reading is not a JSON object".to_string()));
        };

        match self.ingest(&Origin::Manual, &payload).await? {
            IngestOutcome::Persisted(row) => Ok(row),
            IngestOutcome::Dropped(reason) => Err(Error::Validation(format!(
                "reading dropped: {}",
                reason
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn coordinator() -> (Arc<MemoryStore>, IngestionCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = IngestionCoordinator::new(store.clone());
        (store, coordinator)
    }

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_topic_payload_is_persisted_with_topic_label() {
        let (store, coordinator) = coordinator();
        let origin = Origin::Topic("factory/machine_01/sensors".to_string());

        let outcome = coordinator
            .ingest(
                &origin,
                &doc(json!({
                    "device_id": "machine_01",
                    "temperature_c": 150,
                    "pressure_bar": "2.5",
                    "ts": "2024-06-01T00:00:00Z"
                })),
            )
            .await
            .unwrap();

        let IngestOutcome::Persisted(row) = outcome else {
            panic!("expected persisted reading, got {:?}", outcome);
        };
        assert_eq!(row.device_id, "machine_01");
        assert_eq!(row.temperature_c, Some(150.0));
        assert_eq!(row.pressure_bar, Some(2.5));
        assert_eq!(row.vibration_mm_s, None);
        assert_eq!(row.ts, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(row.source_topic.as_deref(), Some("factory/machine_01/sensors"));
        assert_eq!(store.device_count().await, 1);
    }

    #[tokio::test]
    async fn test_topic_payload_without_device_is_dropped() {
        let (store, coordinator) = coordinator();
        let origin = Origin::Topic("factory/unknown/sensors".to_string());

        let outcome = coordinator
            .ingest(&origin, &doc(json!({ "temperature_c": 20.0 })))
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Dropped(DropReason::MissingDeviceId));
        assert_eq!(store.device_count().await, 0);
        assert_eq!(store.reading_count().await, 0);
    }

    #[tokio::test]
    async fn test_manual_reading_uses_manual_label() {
        let (_store, coordinator) = coordinator();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let row = coordinator
            .ingest_manual(&ManualReading {
                device_id: "press_07".to_string(),
                temperature_c: Some(40.0),
                pressure_bar: None,
                vibration_mm_s: Some(12.5),
                ts,
            })
            .await
            .unwrap();

        assert_eq!(row.source_topic.as_deref(), Some(MANUAL_SOURCE));
        assert_eq!(row.ts, ts);
        assert_eq!(row.vibration_mm_s, Some(12.5));
        assert!(row.ingested_at >= ts);
    }

    #[tokio::test]
    async fn test_manual_storage_failure_propagates() {
        let (store, coordinator) = coordinator();
        store.set_fail_reading_inserts(true);

        let err = coordinator
            .ingest_manual(&ManualReading {
                device_id: "press_07".to_string(),
                temperature_c: None,
                pressure_bar: None,
                vibration_mm_s: None,
                ts: Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(err.is_storage());
        assert_eq!(store.reading_count().await, 0);
    }

    #[tokio::test]
    async fn test_manual_blank_device_is_rejected() {
        let (store, coordinator) = coordinator();

        let err = coordinator
            .ingest_manual(&ManualReading {
                device_id: "   ".to_string(),
                temperature_c: None,
                pressure_bar: None,
                vibration_mm_s: None,
                ts: Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.reading_count().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_device_id_or_topic_is_dropped_before_storage() {
        let (store, coordinator) = coordinator();
        let long_id = "m".repeat(DEVICE_ID_MAX_LEN + 1);

        let outcome = coordinator
            .ingest(
                &Origin::Topic("factory/m/sensors".to_string()),
                &doc(json!({ "device_id": long_id })),
            )
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Dropped(DropReason::DeviceIdTooLong));

        let long_topic = format!("factory/{}/sensors", "t".repeat(SOURCE_TOPIC_MAX_LEN));
        let outcome = coordinator
            .ingest(
                &Origin::Topic(long_topic),
                &doc(json!({ "device_id": "machine_01" })),
            )
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Dropped(DropReason::TopicTooLong));

        // exactly at the column width is still stored
        let outcome = coordinator
            .ingest(
                &Origin::Topic("factory/m/sensors".to_string()),
                &doc(json!({ "device_id": "m".repeat(DEVICE_ID_MAX_LEN) })),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Persisted(_)));

        assert_eq!(store.device_count().await, 1);
        assert_eq!(store.reading_count().await, 1);
    }
}
