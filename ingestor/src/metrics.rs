use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref DROPPED_MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "ingestor_dropped_messages_total",
            "Messages dropped before persistence, by reason"
        ),
        &["reason"]
    )
    .unwrap();
    pub static ref FAILED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_failed_messages_total",
        "MQTT messages dropped because processing failed"
    ))
    .unwrap();
    pub static ref PERSISTED_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_persisted_readings_total",
        "Total readings committed to the store"
    ))
    .unwrap();
    pub static ref ANOMALIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("ingestor_anomalies_total", "Anomaly flags raised, by flag"),
        &["flag"]
    )
    .unwrap();
    pub static ref DEVICES_AUTO_REGISTERED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_devices_auto_registered_total",
        "Devices created on first sighting"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total database insert failures"
    ))
    .unwrap();
    pub static ref PERSIST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_persist_latency_seconds",
            "Time taken to persist one reading"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_channel_full_total",
        "Total number of times the processing queue was full (backpressure events)"
    ))
    .unwrap();
    pub static ref MQTT_CONNECTED: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_mqtt_connected",
        "1 while the subscription worker holds a broker connection"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FAILED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERSISTED_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ANOMALIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES_AUTO_REGISTERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERSIST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MQTT_CONNECTED.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
