//! Threshold checks over a normalized reading. Ranges are inclusive.

use crate::normalize::NormalizedReading;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TEMP_MIN: f64 = -10.0;
pub const TEMP_MAX: f64 = 120.0;
pub const PRESSURE_MIN: f64 = 0.0;
pub const PRESSURE_MAX: f64 = 20.0;
pub const VIBRATION_MAX: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyFlag {
    TemperatureOutOfRange,
    PressureOutOfRange,
    VibrationHigh,
}

impl AnomalyFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyFlag::TemperatureOutOfRange => "temperature_out_of_range",
            AnomalyFlag::PressureOutOfRange => "pressure_out_of_range",
            AnomalyFlag::VibrationHigh => "vibration_high",
        }
    }
}

impl fmt::Display for AnomalyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags in fixed check order: temperature, pressure, vibration.
pub fn anomaly_flags(reading: &NormalizedReading) -> Vec<AnomalyFlag> {
    let mut flags = Vec::new();

    if let Some(t) = reading.temperature_c {
        if !(TEMP_MIN..=TEMP_MAX).contains(&t) {
            flags.push(AnomalyFlag::TemperatureOutOfRange);
        }
    }

    if let Some(p) = reading.pressure_bar {
        if !(PRESSURE_MIN..=PRESSURE_MAX).contains(&p) {
            flags.push(AnomalyFlag::PressureOutOfRange);
        }
    }

    if let Some(v) = reading.vibration_mm_s {
        if v > VIBRATION_MAX {
            flags.push(AnomalyFlag::VibrationHigh);
        }
    }

    flags
}

/// Returns the reading with its anomaly list filled in.
pub fn detect_anomalies(mut reading: NormalizedReading) -> NormalizedReading {
    reading.anomalies = anomaly_flags(&reading);
    reading
}
