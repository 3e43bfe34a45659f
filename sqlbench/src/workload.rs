//! The five benchmark workloads and the worker pool that drives them.
mod insert;
mod lookup;
mod mutate;

use crate::aggregator::{Aggregator, Recorder};
use crate::backend::Database;
use crate::error::DbError;
use crate::keyspace::KeySnapshot;
use crate::pace::{Deadline, Pacer};
use async_trait::async_trait;
use sqlbench_core::Measurement;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    Insert,
    Select,
    Range,
    Update,
    Delete,
}

impl Workload {
    /// Execution order of a full run.
    pub const ALL: [Workload; 5] = [
        Workload::Insert,
        Workload::Select,
        Workload::Range,
        Workload::Update,
        Workload::Delete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Workload::Insert => insert::Insert::NAME,
            Workload::Select => lookup::Select::NAME,
            Workload::Range => lookup::Range::NAME,
            Workload::Update => mutate::Update::NAME,
            Workload::Delete => mutate::Delete::NAME,
        }
    }

    /// Runs one pass of this workload until `deadline`.
    #[instrument(name = "pass", skip_all, fields(workload = self.name(), concurrency = ctx.concurrency))]
    pub async fn run(self, ctx: &PassContext, deadline: &Deadline) -> Measurement {
        match self {
            Workload::Insert => run_workers::<insert::Insert>(ctx, deadline).await,
            Workload::Select => run_workers::<lookup::Select>(ctx, deadline).await,
            Workload::Range => run_workers::<lookup::Range>(ctx, deadline).await,
            Workload::Update => run_workers::<mutate::Update>(ctx, deadline).await,
            Workload::Delete => run_workers::<mutate::Delete>(ctx, deadline).await,
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What every worker of a pass shares.
#[derive(Clone)]
pub struct PassContext {
    pub db: Arc<dyn Database>,
    /// `None` when the table was empty at capture time.
    pub snapshot: Option<KeySnapshot>,
    pub concurrency: usize,
    /// Nominal length of the pass, used for throughput.
    pub duration: Duration,
    pub tx_batch: usize,
    pub range_limit: usize,
    pub pacer: Pacer,
    /// Node of the pass's first insert worker; worker `i` uses `first_node + i`.
    pub first_node: u32,
}

impl PassContext {
    fn snapshot_with(&self, min_keys: usize) -> Option<KeySnapshot> {
        self.snapshot.clone().filter(|s| s.len() >= min_keys)
    }
}

#[async_trait]
trait Operation: Sized + Send + Sync + 'static {
    const NAME: &'static str;

    type Worker: Send;

    /// `None` when the pass has nothing to work on.
    fn build(ctx: &PassContext) -> Option<Self>;

    /// Rate limiter permits consumed per step.
    fn permits(&self) -> usize {
        1
    }

    async fn prepare(&self) -> Result<(), DbError>;

    /// Per-worker state. `None` means the worker cannot run at all.
    fn worker(&self, slot: usize) -> Option<Self::Worker>;

    /// One loop iteration. Records its own latencies and errors.
    async fn step(&self, worker: &mut Self::Worker, rec: &Recorder, deadline: &Deadline);
}

async fn run_workers<O: Operation>(ctx: &PassContext, deadline: &Deadline) -> Measurement {
    let Some(op) = O::build(ctx) else {
        warn!("Not enough keys for {}; reporting an idle pass", O::NAME);
        return Measurement::idle(O::NAME, ctx.concurrency, ctx.duration);
    };

    let agg = Aggregator::new(O::NAME, ctx.concurrency, ctx.duration);
    if let Err(e) = op.prepare().await {
        warn!("Failed to prepare {}: {e}", O::NAME);
        agg.recorder().error();
        return agg.finalize().await;
    }

    let op = Arc::new(op);
    let mut workers = JoinSet::new();
    for slot in 0..ctx.concurrency {
        let op = op.clone();
        let rec = agg.recorder();
        let deadline = deadline.clone();
        let pacer = ctx.pacer.clone();

        workers.spawn(async move {
            let Some(mut worker) = op.worker(slot) else {
                rec.error();
                return;
            };

            while !deadline.expired() {
                if !pacer.admit(op.permits(), &deadline).await {
                    break;
                }
                op.step(&mut worker, &rec, &deadline).await;
            }
            trace!("Worker {slot} done");
        });
    }

    // NOTE: Every recorder is dropped once its worker ends, which lets finalize drain.
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            error!("{} worker failed: {e}", O::NAME);
        }
    }

    agg.finalize().await
}
