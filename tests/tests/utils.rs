use sqlbench::pace::{Deadline, Pacer};
use sqlbench::workload::PassContext;
use sqlbench::{Database, KeySnapshot, Workload};
use sqlbench_core::Measurement;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[allow(unused)]
pub fn context(
    db: Arc<dyn Database>,
    snapshot: Option<KeySnapshot>,
    concurrency: usize,
    duration: Duration,
) -> PassContext {
    PassContext {
        db,
        snapshot,
        concurrency,
        duration,
        tx_batch: 1,
        range_limit: 100,
        pacer: Pacer::unlimited(),
        first_node: 0,
    }
}

#[allow(unused)]
pub async fn run_pass(workload: Workload, ctx: &PassContext) -> Measurement {
    let deadline = Deadline::new(&CancellationToken::new(), ctx.duration);
    workload.run(ctx, &deadline).await
}

#[allow(unused)]
pub fn keys(keys: &[&str]) -> KeySnapshot {
    KeySnapshot::from_keys(keys.iter().map(|k| k.to_string()).collect()).unwrap()
}
