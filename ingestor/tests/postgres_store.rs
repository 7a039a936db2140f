//! Runs against a real Postgres when INGESTOR_TEST_DATABASE_URL is set; otherwise
//! each test returns early.

use chrono::{Duration, TimeZone, Utc};
use ingestor::model::{NewDevice, NewReading, ReadingQuery};
use ingestor::registry::{ensure_device_exists, Registration};
use ingestor::store::{PgStore, TelemetryStore};
use ingestor::Error;
use std::sync::Arc;
use uuid::Uuid;

async fn test_store() -> Option<Arc<PgStore>> {
    let url = std::env::var("INGESTOR_TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 20)
        .await
        .expect("connect to test database");
    Some(Arc::new(store))
}

fn unique_device(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registration_inserts_one_row() {
    let Some(store) = test_store().await else {
        return;
    };
    let device_id = unique_device("race");

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        let device_id = device_id.clone();
        tasks.push(tokio::spawn(async move {
            ensure_device_exists(store.as_ref(), &device_id).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() == Registration::Created {
            created += 1;
        }
    }

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE device_id = $1")
        .bind(&device_id)
        .fetch_one(store.pool())
        .await
        .unwrap();

    assert_eq!(created, 1);
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn duplicate_create_is_conflict() {
    let Some(store) = test_store().await else {
        return;
    };
    let device = NewDevice {
        device_id: unique_device("press"),
        name: "Press".to_string(),
        location: Some("Hall B".to_string()),
        description: None,
    };

    let created = store.create_device(&device).await.unwrap();
    assert_eq!(created.device_id, device.device_id);

    let err = store.create_device(&device).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let fetched = store.get_device(&device.device_id).await.unwrap();
    assert_eq!(fetched.map(|d| d.id), Some(created.id));
}

#[tokio::test]
async fn readings_round_trip_newest_first() {
    let Some(store) = test_store().await else {
        return;
    };
    let device_id = unique_device("machine");
    store
        .insert_device_if_absent(&NewDevice::auto_registered(&device_id))
        .await
        .unwrap();

    let older = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let newer = older + Duration::seconds(30);
    for (ts, temperature) in [(newer, Some(80.0)), (older, None)] {
        store
            .insert_reading(&NewReading {
                device_id: device_id.clone(),
                temperature_c: temperature,
                pressure_bar: Some(5.5),
                vibration_mm_s: None,
                ts,
                source_topic: format!("factory/{}/sensors", device_id),
            })
            .await
            .unwrap();
    }

    let rows = store
        .list_readings(&ReadingQuery::for_device(&device_id))
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].ts, newer);
    assert_eq!(rows[0].temperature_c, Some(80.0));
    assert_eq!(rows[1].ts, older);
    assert_eq!(rows[1].temperature_c, None);
    assert!(store.health_check().await.is_ok());
}
