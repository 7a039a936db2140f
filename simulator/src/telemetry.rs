use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Body published to `factory/<device>/sensors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryReading {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_bar: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration_mm_s: Option<f64>,
    pub ts: String,
}

pub fn topic_for(device_id: &str) -> String {
    format!("factory/{}/sensors", device_id)
}

/// Generates a reading; with probability `outlier_ratio` one measurement is
/// pushed outside its operating range.
pub fn generate_reading(rng: &mut impl Rng, device_id: String, outlier_ratio: f64) -> FactoryReading {
    let mut reading = FactoryReading {
        device_id,
        temperature_c: Some(rng.gen_range(20.0..90.0)),
        pressure_bar: Some(rng.gen_range(1.0..12.0)),
        vibration_mm_s: Some(rng.gen_range(0.5..15.0)),
        ts: Utc::now().to_rfc3339(),
    };

    // sensors occasionally omit a channel
    if rng.gen_bool(0.02) {
        reading.vibration_mm_s = None;
    }

    if rng.gen_bool(outlier_ratio) {
        match rng.gen_range(0..4) {
            0 => reading.temperature_c = Some(rng.gen_range(121.0..200.0)),
            1 => reading.temperature_c = Some(rng.gen_range(-40.0..-11.0)),
            2 => reading.pressure_bar = Some(rng.gen_range(21.0..35.0)),
            _ => reading.vibration_mm_s = Some(rng.gen_range(41.0..80.0)),
        }
    }

    reading
}

/// Bodies the ingestor must drop without persisting anything.
pub fn malformed_payload(rng: &mut impl Rng, device_id: &str) -> Vec<u8> {
    match rng.gen_range(0..4) {
        0 => b"not json".to_vec(),
        1 => format!("{{\"device_id\": \"{}\", \"temperature_c\":", device_id).into_bytes(),
        2 => b"[1, 2, 3]".to_vec(),
        _ => br#"{"temperature_c": 25.0, "pressure_bar": 2.0}"#.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outlier_ratio_one_always_leaves_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let r = generate_reading(&mut rng, "machine_01".to_string(), 1.0);
            let temp = r.temperature_c.unwrap();
            let pressure = r.pressure_bar.unwrap();
            let vibration = r.vibration_mm_s.unwrap_or(0.0);
            assert!(temp > 120.0 || temp < -10.0 || pressure > 20.0 || vibration > 40.0);
        }
    }

    #[test]
    fn test_normal_reading_serializes_expected_keys() {
        let mut rng = rand::thread_rng();
        let r = generate_reading(&mut rng, "press_07".to_string(), 0.0);
        let value = serde_json::to_value(&r).unwrap();

        assert_eq!(value["device_id"], "press_07");
        assert!(value["temperature_c"].is_number());
        assert!(value["ts"].as_str().unwrap().contains('T'));
        assert_eq!(topic_for("press_07"), "factory/press_07/sensors");
    }

    #[test]
    fn test_malformed_payload_never_yields_usable_reading() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let body = malformed_payload(&mut rng, "machine_01");
            let usable = serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("device_id").cloned());
            assert!(usable.is_none());
        }
    }
}
