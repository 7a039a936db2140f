//! Raw MQTT/REST payload -> canonical reading.
//!
//! Normalization never fails: malformed measurements become absent, a missing
//! `device_id` becomes an empty string and an unusable `ts` becomes the
//! current server time. All timestamps are UTC.

use crate::anomaly::AnomalyFlag;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const DEVICE_ID_KEY: &str = "device_id";
pub const TEMPERATURE_KEY: &str = "temperature_c";
pub const PRESSURE_KEY: &str = "pressure_bar";
pub const VIBRATION_KEY: &str = "vibration_mm_s";
pub const TIMESTAMP_KEY: &str = "ts";

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Transient, per-call view of one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    pub device_id: String,
    pub temperature_c: Option<f64>,
    pub pressure_bar: Option<f64>,
    pub vibration_mm_s: Option<f64>,
    pub ts: DateTime<Utc>,
    pub anomalies: Vec<AnomalyFlag>,
}

impl NormalizedReading {
    /// JSON form using the wire keys. Anomaly flags are not part of the wire format.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert(DEVICE_ID_KEY.into(), Value::String(self.device_id.clone()));
        doc.insert(TEMPERATURE_KEY.into(), number_or_null(self.temperature_c));
        doc.insert(PRESSURE_KEY.into(), number_or_null(self.pressure_bar));
        doc.insert(VIBRATION_KEY.into(), number_or_null(self.vibration_mm_s));
        doc.insert(
            TIMESTAMP_KEY.into(),
            Value::String(self.ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        doc
    }
}

fn number_or_null(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

pub fn normalize_payload(payload: &Map<String, Value>) -> NormalizedReading {
    NormalizedReading {
        device_id: coerce_device_id(payload.get(DEVICE_ID_KEY)),
        temperature_c: coerce_measurement(TEMPERATURE_KEY, payload.get(TEMPERATURE_KEY)),
        pressure_bar: coerce_measurement(PRESSURE_KEY, payload.get(PRESSURE_KEY)),
        vibration_mm_s: coerce_measurement(VIBRATION_KEY, payload.get(VIBRATION_KEY)),
        ts: resolve_timestamp(payload.get(TIMESTAMP_KEY)),
        anomalies: Vec::new(),
    }
}

fn coerce_device_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn coerce_measurement(field: &str, value: Option<&Value>) -> Option<f64> {
    let value = match value {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed.filter(|v| v.is_finite()) {
        Some(v) => Some(v),
        None => {
            warn!(field, value = %value, "Invalid numeric field");
            None
        }
    }
}

/// Resolves `ts`, falling back to the current server time.
pub fn resolve_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value.and_then(Value::as_str).and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            debug!(value = ?value, "Unusable timestamp, using server time");
            Utc::now()
        }
    }
}

/// Parses ISO-8601 text. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
