mod utils;
#[allow(unused)]
use utils::*;

use sqlbench::prelude::*;
use sqlbench::{loader, schema, KeySnapshot, SnapshotError, Workload};
use std::collections::HashSet;
use std::time::Duration;

fn quick(engine: Engine) -> BenchConfig {
    BenchConfig {
        concurrency: 4,
        warmup: Duration::ZERO,
        duration: Duration::from_millis(200),
        tx_batch: 8,
        rows: 10_000,
        ..BenchConfig::new(engine)
    }
}

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(60_000)]
async fn sqlite_in_memory_end_to_end() {
    let config = BenchConfig {
        dsn: ":memory:".into(),
        ..quick(Engine::Sqlite)
    };
    let mut runner = Runner::new(config).unwrap();
    let results = runner.run().await.unwrap();
    assert_eq!(results.len(), 5);

    let insert = &results[0];
    assert_eq!(insert.workload(), "insert");
    assert!(insert.ops() > 0);
    assert_eq!(insert.errors(), 0);
    assert!(insert.sparkline().is_some());

    let select = &results[1];
    assert!(select.ops() > 0);
    assert_eq!(select.errors(), 0);

    assert!(results.iter().all(|m| m.pretty().lines().count() >= 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(60_000)]
async fn sqlite_file_database_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sqlite").join("bench.db");
    let config = BenchConfig {
        dsn: format!("file:{}?_busy_timeout=5000", path.display()),
        rows: 500,
        ..quick(Engine::Sqlite)
    };

    let results = Runner::new(config).unwrap().run().await.unwrap();
    assert!(path.exists());
    assert!(results[0].ops() > 0);
    assert!(results[2].ops() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn memory_engine_json_report() {
    let results = Runner::new(quick(Engine::Memory)).unwrap().run().await.unwrap();

    for m in &results {
        let json: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();
        let fields: HashSet<_> = json.as_object().unwrap().keys().cloned().collect();
        let expected: HashSet<_> = [
            "workload",
            "concurrency",
            "duration",
            "ops",
            "errors",
            "p50",
            "p95",
            "p99",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(fields, expected);
        assert_eq!(json["duration"], 200_000_000u64);
        assert_eq!(json["ops"], m.ops());
    }
}

#[tokio::test]
async fn snapshot_over_sqlite_is_descending() {
    let db = backend::open(Engine::Sqlite, ":memory:", 1).await.unwrap();
    schema::init(&*db).await.unwrap();

    assert!(matches!(
        KeySnapshot::capture(&*db, 64).await,
        Err(SnapshotError::Empty)
    ));

    loader::load(&*db, 64, 10).await.unwrap();
    let snap = KeySnapshot::capture(&*db, 64).await.unwrap();
    assert_eq!(snap.len(), 64);
    assert_eq!(snap.keys().iter().collect::<HashSet<_>>().len(), 64);
    assert!(snap.keys().windows(2).all(|w| w[0] > w[1]));
    assert_eq!(snap.keys()[63], "key-00000000");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn schema_init_is_idempotent() {
    let db = backend::open(Engine::Sqlite, ":memory:", 1).await.unwrap();
    schema::init(&*db).await.unwrap();
    schema::init(&*db).await.unwrap();

    loader::load(&*db, 10, 3).await.unwrap();
    let snap = KeySnapshot::capture(&*db, 100).await.unwrap();
    let ctx = context(db, Some(snap), 2, Duration::from_millis(100));

    // Every snapshot key exists, so point reads never miss.
    let m = run_pass(Workload::Select, &ctx).await;
    assert!(m.ops() > 0);
    assert_eq!(m.errors(), 0);
}

#[tokio::test]
async fn unknown_engine_is_fatal() {
    let res = backend::open_named("chai", "", 4).await;
    assert!(res.is_err());
    let err = res.err().unwrap().to_string();
    assert!(err.contains("chai"), "{err}");
}
