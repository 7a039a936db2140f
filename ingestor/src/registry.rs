//! Auto-registration of devices seen for the first time.

use crate::errors::{Error, Result};
use crate::metrics::DEVICES_AUTO_REGISTERED_TOTAL;
use crate::model::NewDevice;
use crate::store::TelemetryStore;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// This call inserted the device row.
    Created,
    /// The row already existed, or a concurrent caller won the insert.
    AlreadyKnown,
    /// Blank id, nothing to register.
    Skipped,
}

/// Makes sure a device row exists for `device_id`. Safe to call concurrently
/// for the same unseen id: exactly one row is created and no caller sees a
/// uniqueness error.
pub async fn ensure_device_exists(
    store: &dyn TelemetryStore,
    device_id: &str,
) -> Result<Registration> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Ok(Registration::Skipped);
    }

    match store
        .insert_device_if_absent(&NewDevice::auto_registered(device_id))
        .await
    {
        Ok(true) => {
            DEVICES_AUTO_REGISTERED_TOTAL.inc();
            info!(device_id, "Auto-registered device");
            Ok(Registration::Created)
        }
        Ok(false) | Err(Error::Conflict(_)) => {
            debug!(device_id, "Device already registered");
            Ok(Registration::AlreadyKnown)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_creates_then_noops() {
        let store = MemoryStore::new();

        assert_eq!(
            ensure_device_exists(&store, "machine_01").await.unwrap(),
            Registration::Created
        );
        assert_eq!(
            ensure_device_exists(&store, "machine_01").await.unwrap(),
            Registration::AlreadyKnown
        );

        let device = store.get_device("machine_01").await.unwrap().unwrap();
        assert_eq!(device.name, "Auto-registered machine_01");
        assert_eq!(
            device.description.as_deref(),
            Some("Created automatically from MQTT ingestion.")
        );
        assert_eq!(device.location, None);
    }

    #[tokio::test]
    async fn test_blank_id_is_skipped() {
        let store = MemoryStore::new();
        assert_eq!(
            ensure_device_exists(&store, "  ").await.unwrap(),
            Registration::Skipped
        );
        assert_eq!(store.device_count().await, 0);
    }

    #[tokio::test]
    async fn test_explicitly_registered_device_is_kept() {
        let store = MemoryStore::new();
        store
            .create_device(&NewDevice {
                device_id: "press_07".to_string(),
                name: "Press 7".to_string(),
                location: Some("Hall B".to_string()),
                description: None,
            })
            .await
            .unwrap();

        assert_eq!(
            ensure_device_exists(&store, "press_07").await.unwrap(),
            Registration::AlreadyKnown
        );
        let device = store.get_device("press_07").await.unwrap().unwrap();
        assert_eq!(device.name, "Press 7");
    }
}
