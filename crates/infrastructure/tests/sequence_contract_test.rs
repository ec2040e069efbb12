//! 序列存储契约测试：Memory 与 SQLite 后端必须表现一致

use serde_json::json;
use taskq_core::config::SequenceConfig;
use taskq_core::models::{NewSequenceRecord, Priority};
use taskq_core::{Registry, TaskqError};
use taskq_infrastructure::{SequenceStore, SequenceStoreFactory};
use tempfile::TempDir;

const SOURCE: &str = "test|127.0.0.1:4730";

fn record(task: &str, priority: Priority, n: i64) -> NewSequenceRecord {
    NewSequenceRecord::new(task, json!({ "n": n }), priority, SOURCE)
}

fn memory_config(debug: bool) -> SequenceConfig {
    SequenceConfig {
        driver: "Memory".into(),
        debug,
        ..SequenceConfig::default()
    }
}

fn sqlite_config(dir: &TempDir, debug: bool) -> SequenceConfig {
    let path = dir.path().join("sequence.db");
    SequenceConfig {
        driver: "Sqlite".into(),
        database: Some(path.to_string_lossy().into_owned()),
        table: Some("taskq_sequence".into()),
        debug,
        ..SequenceConfig::default()
    }
}

/// 为每个后端各创建一个存储实例
fn stores(dir: &TempDir, debug: bool) -> Vec<Box<dyn SequenceStore>> {
    [memory_config(debug), sqlite_config(dir, debug)]
        .into_iter()
        .map(|config| {
            SequenceStoreFactory::new(config, Registry::new())
                .create()
                .unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_fetch_all_orders_by_priority_then_id() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, false) {
        let low = store.store(&record("A", Priority::Low, 1), None).await.unwrap();
        let high1 = store.store(&record("B", Priority::High, 2), None).await.unwrap();
        let normal = store.store(&record("C", Priority::Normal, 3), None).await.unwrap();
        let high2 = store.store(&record("D", Priority::High, 4), None).await.unwrap();

        let ids: Vec<i64> = store
            .fetch_all(0)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![high1, high2, normal, low], "driver {}", store.driver());

        let limited = store.fetch_all(2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, high1);
        assert_eq!(limited[1].id, high2);

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_store_then_fetch_returns_same_fields() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, false) {
        let new = NewSequenceRecord::new(
            "CheckTime",
            json!({ "a": 1700000000, "tags": ["x", "y"] }),
            Priority::Normal,
            SOURCE,
        );
        let id = store.store(&new, None).await.unwrap();
        let fetched = store.fetch(id).await.unwrap().expect("record exists");

        assert_eq!(fetched.id, id);
        assert_eq!(fetched.task, "CheckTime");
        assert_eq!(fetched.params, new.params);
        assert_eq!(fetched.priority, Priority::Normal);
        assert_eq!(fetched.source, SOURCE);
        assert_eq!(fetched.date.timestamp_subsec_nanos() % 1000, 0);
        assert_eq!(store.fetch(id).await.unwrap().unwrap().date, fetched.date);

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_store_with_existing_id_updates_in_place() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, false) {
        let id = store.store(&record("A", Priority::Low, 1), None).await.unwrap();
        let same = store
            .store(&record("A", Priority::High, 2), Some(id))
            .await
            .unwrap();
        assert_eq!(same, id);
        assert_eq!(store.count().await.unwrap(), 1);

        let updated = store.fetch(id).await.unwrap().unwrap();
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.params, json!({ "n": 2 }));

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_store_with_unknown_id_allocates_new_id() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, false) {
        let first = store.store(&record("A", Priority::Low, 1), None).await.unwrap();
        let second = store
            .store(&record("B", Priority::Low, 2), Some(first + 1000))
            .await
            .unwrap();
        assert_ne!(second, first + 1000);
        assert!(second > first);
        assert_eq!(store.count().await.unwrap(), 2);

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_remove_and_remove_all() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, false) {
        assert!(!store.has_data().await.unwrap());

        let id = store.store(&record("A", Priority::Normal, 1), None).await.unwrap();
        store.store(&record("B", Priority::Normal, 2), None).await.unwrap();
        assert!(store.has_data().await.unwrap());

        assert!(store.remove(id).await.unwrap());
        assert!(!store.remove(id).await.unwrap());
        assert!(store.fetch(id).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.remove_all().await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.fetch_all(0).await.unwrap().is_empty());

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_store_rejects_incomplete_record() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, false) {
        let empty_params = NewSequenceRecord::new("A", json!({}), Priority::Normal, SOURCE);
        let result = store.store(&empty_params, None).await;
        assert!(matches!(result, Err(TaskqError::Sequence(_))));
        assert_eq!(store.count().await.unwrap(), 0);

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_debug_trace_records_operations() {
    let dir = TempDir::new().unwrap();
    for mut store in stores(&dir, true) {
        store.store(&record("A", Priority::High, 1), None).await.unwrap();
        store.count().await.unwrap();

        let trace = store.debug_trace();
        assert!(!trace.is_empty());
        assert!(trace.iter().all(|entry| entry.starts_with("[STATUS => \"OK\"]")));

        store.close().await.unwrap();
    }

    for mut store in stores(&TempDir::new().unwrap(), false) {
        store.count().await.unwrap();
        assert!(store.debug_trace().is_empty());
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_memory_instances_share_factory_table() {
    let factory = SequenceStoreFactory::new(memory_config(false), Registry::new());
    let mut writer = factory.create().unwrap();
    let id = writer.store(&record("A", Priority::Low, 1), None).await.unwrap();
    writer.close().await.unwrap();

    let mut reader = factory.create().unwrap();
    assert!(reader.fetch(id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sqlite_data_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    let factory = SequenceStoreFactory::new(sqlite_config(&dir, false), Registry::new());

    let mut first = factory.create().unwrap();
    let id = first.store(&record("A", Priority::High, 1), None).await.unwrap();
    first.close().await.unwrap();

    let mut second = factory.create().unwrap();
    let records = second.fetch_all(0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_mysql_fails_with_connection_error() {
    let config = SequenceConfig {
        driver: "PDOMysql".into(),
        host: Some("127.0.0.1".into()),
        port: Some(1),
        user: Some("queue".into()),
        password: Some("secret".into()),
        database: Some("jobs".into()),
        table: Some("taskq_sequence".into()),
        ..SequenceConfig::default()
    };
    let mut store = SequenceStoreFactory::new(config, Registry::new())
        .create()
        .unwrap();
    let result = store.store(&record("A", Priority::High, 1), None).await;
    assert!(matches!(result, Err(TaskqError::Connection(_))));
}
