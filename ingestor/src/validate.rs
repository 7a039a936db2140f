use crate::errors::{Error, Result};
use crate::model::{ManualReading, NewDevice, ReadingQuery, DEVICE_ID_MAX_LEN};

const DEVICE_ID_MIN: usize = 2;
const DEVICE_ID_MAX: usize = DEVICE_ID_MAX_LEN;
const NAME_MIN: usize = 2;
const NAME_MAX: usize = 120;
const LOCATION_MAX: usize = 120;
const DESCRIPTION_MAX: usize = 2000;

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(Error::Validation(format!(
            "{} length {} out of range [{}, {}]",
            field, len, min, max
        )));
    }
    Ok(())
}

/// Validates a reading submitted through the direct ingestion endpoint.
pub fn validate_manual_reading(reading: &ManualReading) -> Result<()> {
    check_len("device_id", reading.device_id.trim(), DEVICE_ID_MIN, DEVICE_ID_MAX)?;

    for (field, value) in [
        ("temperature_c", reading.temperature_c),
        ("pressure_bar", reading.pressure_bar),
        ("vibration_mm_s", reading.vibration_mm_s),
    ] {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("{} must be finite", field)));
        }
    }

    Ok(())
}

/// Validates an administrative device registration.
pub fn validate_new_device(device: &NewDevice) -> Result<()> {
    check_len("device_id", &device.device_id, DEVICE_ID_MIN, DEVICE_ID_MAX)?;
    check_len("name", &device.name, NAME_MIN, NAME_MAX)?;

    if let Some(location) = &device.location {
        check_len("location", location, 0, LOCATION_MAX)?;
    }
    if let Some(description) = &device.description {
        check_len("description", description, 0, DESCRIPTION_MAX)?;
    }

    Ok(())
}

pub fn validate_reading_query(query: &ReadingQuery) -> Result<()> {
    let limit = query.effective_limit();
    if !(1..=ReadingQuery::MAX_LIMIT).contains(&limit) {
        return Err(Error::Validation(format!(
            "limit {} out of range [1, {}]",
            limit,
            ReadingQuery::MAX_LIMIT
        )));
    }
    if let (Some(from), Some(to)) = (query.ts_from, query.ts_to) {
        if from > to {
            return Err(Error::Validation("ts_from must not be after ts_to".to_string()));
        }
    }
    Ok(())
}
