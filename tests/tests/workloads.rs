mod utils;
#[allow(unused)]
use utils::*;

use mock_backend::{MockConfig, MockDatabase};
use sqlbench::{Op, Value, Workload};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const LATENCY: Duration = Duration::from_millis(5);
const CONCURRENCY: usize = 4;
const DURATION: Duration = Duration::from_millis(500);

/// C workers for D against an op that takes t should finish about C * D / t operations.
fn expected_ops() -> f64 {
    CONCURRENCY as f64 * DURATION.as_secs_f64() / LATENCY.as_secs_f64()
}

fn mock(config: MockConfig) -> Arc<MockDatabase> {
    Arc::new(MockDatabase::new(MockConfig {
        latency: LATENCY,
        ..config
    }))
}

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(10_000)]
async fn throughput_matches_latency() {
    let db = mock(MockConfig::default());
    let ctx = context(db, Some(keys(&["a", "b", "c"])), CONCURRENCY, DURATION);

    let m = run_pass(Workload::Select, &ctx).await;
    let ratio = m.ops() as f64 / expected_ops();
    assert!((0.6..=1.05).contains(&ratio), "ops {} ratio {ratio}", m.ops());
    assert_eq!(m.errors(), 0);
    assert!(m.p50() >= LATENCY);
    assert!(m.sparkline().is_some());
}

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(10_000)]
async fn failing_backend_only_counts_errors() {
    let db = mock(MockConfig {
        fail: true,
        ..Default::default()
    });
    let ctx = context(db, Some(keys(&["a", "b"])), CONCURRENCY, DURATION);

    let m = run_pass(Workload::Update, &ctx).await;
    let ratio = m.errors() as f64 / expected_ops();
    assert!((0.6..=1.05).contains(&ratio), "errors {} ratio {ratio}", m.errors());
    assert_eq!(m.ops(), 0);
    assert_eq!(m.p99(), Duration::ZERO);
    assert!(m.sparkline().is_none());
    assert_eq!(m.error_rate(), 1.);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn range_bounds_are_normalized() {
    let db = mock(MockConfig {
        record_calls: true,
        latency: Duration::ZERO,
        ..Default::default()
    });
    let ctx = context(
        db.clone(),
        Some(keys(&["key-0005", "key-0002"])),
        2,
        Duration::from_millis(100),
    );

    let m = run_pass(Workload::Range, &ctx).await;
    assert!(m.ops() > 0);

    let calls = db.calls();
    assert!(!calls.is_empty());
    for call in calls {
        assert_eq!(call.op, Op::RangeSelect);
        assert_eq!(
            call.params,
            vec![
                Value::Text("key-0002".into()),
                Value::Text("key-0005".into()),
                Value::Int(100),
            ]
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn prepare_failure_is_one_error() {
    let db = mock(MockConfig {
        fail_prepare: true,
        ..Default::default()
    });
    let ctx = context(db.clone(), Some(keys(&["a"])), 8, Duration::from_millis(100));

    let m = run_pass(Workload::Delete, &ctx).await;
    assert_eq!(m.ops(), 0);
    assert_eq!(m.errors(), 1);
    assert_eq!(db.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn insert_times_every_write() {
    let db = mock(MockConfig {
        record_calls: true,
        ..Default::default()
    });
    let mut ctx = context(db.clone(), None, 2, Duration::from_millis(200));
    ctx.tx_batch = 4;

    let m = run_pass(Workload::Insert, &ctx).await;
    assert!(m.ops() > 0);
    assert_eq!(m.errors(), 0);

    let calls = db.calls();
    assert_eq!(calls.len() as u64, m.ops());
    let mut seen = std::collections::HashSet::new();
    for call in calls {
        assert_eq!(call.op, Op::Insert);
        assert_eq!(call.params[1], Value::Bytes(b"payload".to_vec()));
        assert!(seen.insert(call.params[0].clone()), "duplicate key");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn pacing_caps_throughput() {
    let db = mock(MockConfig {
        latency: Duration::ZERO,
        ..Default::default()
    });
    let mut ctx = context(db, Some(keys(&["a"])), 4, Duration::from_millis(500));
    ctx.pacer = sqlbench::pace::Pacer::new(NonZeroU32::new(20), 1);

    let m = run_pass(Workload::Select, &ctx).await;
    // One full burst plus half a second of refill.
    assert!(m.ops() > 0);
    assert!(m.ops() <= 32, "ops {}", m.ops());
}

fn insert_context(db: Arc<MockDatabase>, concurrency: usize) -> sqlbench::workload::PassContext {
    let mut ctx = context(db, None, concurrency, Duration::from_millis(300));
    ctx.tx_batch = 4;
    ctx
}

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn failed_writes_keep_the_batch_in_one_transaction() {
    let db = mock(MockConfig {
        record_calls: true,
        fail_every: Some(2),
        ..Default::default()
    });

    let m = run_pass(Workload::Insert, &insert_context(db.clone(), 1)).await;
    assert!(m.errors() > 0);
    assert!(m.ops().abs_diff(m.errors()) <= 1, "ops {} errors {}", m.ops(), m.errors());
    assert_eq!(m.ops() + m.errors(), db.call_count());

    let mut per_tx: BTreeMap<u64, usize> = BTreeMap::new();
    for call in db.calls() {
        let tx = call.tx.expect("insert outside a transaction");
        *per_tx.entry(tx).or_default() += 1;
    }
    assert!(per_tx.values().all(|n| *n <= 4));
    // Full batches ran all four writes despite two of them failing.
    assert!(per_tx.values().any(|n| *n == 4));
    assert_eq!(db.commit_count(), db.begin_count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn begin_failure_counts_once_per_iteration() {
    let db = mock(MockConfig {
        fail_begin: true,
        ..Default::default()
    });

    let m = run_pass(Workload::Insert, &insert_context(db.clone(), 2)).await;
    assert_eq!(m.ops(), 0);
    assert!(m.errors() > 0);
    assert_eq!(m.errors(), db.begin_count());
    assert_eq!(db.call_count(), 0);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn prepare_failure_inside_transaction_aborts_the_iteration() {
    let db = mock(MockConfig {
        fail_prepare: true,
        ..Default::default()
    });

    let m = run_pass(Workload::Insert, &insert_context(db.clone(), 2)).await;
    assert_eq!(m.ops(), 0);
    assert!(m.errors() > 0);
    assert_eq!(m.errors(), db.begin_count());
    assert_eq!(db.call_count(), 0);
    assert_eq!(db.commit_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ntest::timeout(10_000)]
async fn commit_failure_counts_once() {
    let db = mock(MockConfig {
        fail_commit: true,
        ..Default::default()
    });

    let m = run_pass(Workload::Insert, &insert_context(db.clone(), 2)).await;
    assert!(m.ops() > 0);
    assert_eq!(m.ops(), db.call_count());
    assert_eq!(m.errors(), db.commit_count());
    assert_eq!(db.commit_count(), db.begin_count());
}

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(10_000)]
async fn jittered_latency_keeps_throughput() {
    let db = mock(MockConfig {
        jitter: Some(Duration::from_millis(1)),
        ..Default::default()
    });
    let ctx = context(db, Some(keys(&["a", "b", "c"])), CONCURRENCY, DURATION);

    let m = run_pass(Workload::Select, &ctx).await;
    let ratio = m.ops() as f64 / expected_ops();
    assert!((0.5..=1.2).contains(&ratio), "ops {} ratio {ratio}", m.ops());
    assert_eq!(m.errors(), 0);
    assert!(m.p50() < m.p99());
}
