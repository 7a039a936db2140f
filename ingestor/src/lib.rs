//! Industrial telemetry ingestion.
//!
//! MQTT messages (and direct REST submissions) are normalized, checked against
//! fixed operating ranges, attributed to a device that is registered on first
//! sight, and persisted one reading per transaction.

pub mod anomaly;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod normalize;
pub mod persist;
pub mod registry;
pub mod rest;
pub mod store;
pub mod validate;

pub use errors::{Error, Result};
pub use ingest::{DropReason, IngestOutcome, IngestionCoordinator, Origin};
pub use mqtt::{SubscriptionWorker, WorkerConfig, WorkerState};
