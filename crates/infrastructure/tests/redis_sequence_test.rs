//! Redis 后端测试，需要本地 Redis：`cargo test -- --ignored`

use serde_json::json;
use taskq_core::config::SequenceConfig;
use taskq_core::models::{NewSequenceRecord, Priority};
use taskq_core::Registry;
use taskq_infrastructure::SequenceStoreFactory;

fn config(driver: &str, name_space: &str) -> SequenceConfig {
    SequenceConfig {
        driver: driver.into(),
        host: Some(std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".into())),
        name_space: Some(name_space.into()),
        prefix: Some(name_space.into()),
        store_expire_seconds: 120,
        ..SequenceConfig::default()
    }
}

async fn check_ordering_and_removal(driver: &str) {
    let ns = format!("taskq_test_{}_{}:", driver.to_lowercase(), uuid::Uuid::new_v4().simple());
    let mut store = SequenceStoreFactory::new(config(driver, &ns), Registry::new())
        .create()
        .unwrap();
    store.remove_all().await.unwrap();

    let source = "test|127.0.0.1:4730";
    let low = store
        .store(&NewSequenceRecord::new("A", json!({"n": 1}), Priority::Low, source), None)
        .await
        .unwrap();
    let high = store
        .store(&NewSequenceRecord::new("B", json!({"n": 2}), Priority::High, source), None)
        .await
        .unwrap();

    let records = store.fetch_all(0).await.unwrap();
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![high, low]);
    assert!(records.iter().all(|r| r.date.timestamp_subsec_nanos() % 1000 == 0));
    assert_eq!(records[1].params, json!({"n": 1}));
    assert_eq!(store.count().await.unwrap(), 2);

    let same = store
        .store(&NewSequenceRecord::new("A", json!({"n": 3}), Priority::High, source), Some(low))
        .await
        .unwrap();
    assert_eq!(same, low);
    assert_eq!(store.count().await.unwrap(), 2);

    assert!(store.remove(high).await.unwrap());
    assert!(!store.remove(high).await.unwrap());
    assert!(store.remove_all().await.unwrap());
    assert_eq!(store.count().await.unwrap(), 0);
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore] // requires Redis
async fn test_redis_hash_store_contract() {
    check_ordering_and_removal("Redis").await;
}

#[tokio::test]
#[ignore] // requires Redis
async fn test_key_value_store_contract() {
    check_ordering_and_removal("KeyValue").await;
}
