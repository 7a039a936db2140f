use crate::errors::Result;
use crate::metrics::{DB_FAILURES_TOTAL, PERSISTED_READINGS_TOTAL, PERSIST_LATENCY_SECONDS};
use crate::model::{NewReading, SensorReading};
use crate::store::TelemetryStore;
use std::time::Instant;
use tracing::{debug, error};

/// Writes one reading as its own unit of work. Storage failures are returned,
/// never swallowed: the caller decides whether to drop or report them.
pub async fn persist_reading(
    store: &dyn TelemetryStore,
    reading: &NewReading,
) -> Result<SensorReading> {
    let start = Instant::now();

    match store.insert_reading(reading).await {
        Ok(row) => {
            let elapsed = start.elapsed().as_secs_f64();
            PERSIST_LATENCY_SECONDS.observe(elapsed);
            PERSISTED_READINGS_TOTAL.inc();
            debug!(
                device_id = %row.device_id,
                id = row.id,
                "Reading persisted in {:.3}s",
                elapsed
            );
            Ok(row)
        }
        Err(e) => {
            DB_FAILURES_TOTAL.inc();
            error!(
                device_id = %reading.device_id,
                source = %reading.source_topic,
                transient = e.is_transient(),
                error = %e,
                "Failed to persist reading"
            );
            Err(e)
        }
    }
}
