use super::{Operation, PassContext};
use crate::aggregator::Recorder;
use crate::backend::{Database, Op, Statement, Value};
use crate::error::DbError;
use crate::keyspace::KeySnapshot;
use crate::pace::Deadline;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Point reads of random snapshot keys. A missing row counts as an error.
pub(super) struct Select {
    db: Arc<dyn Database>,
    stmt: Statement,
    snapshot: KeySnapshot,
}

#[async_trait]
impl Operation for Select {
    const NAME: &'static str = "select";

    type Worker = SmallRng;

    fn build(ctx: &PassContext) -> Option<Self> {
        Some(Self {
            snapshot: ctx.snapshot_with(1)?,
            stmt: Statement::new(Op::PointSelect, ctx.db.engine().dialect()),
            db: ctx.db.clone(),
        })
    }

    async fn prepare(&self) -> Result<(), DbError> {
        self.db.prepare(&self.stmt).await
    }

    fn worker(&self, _slot: usize) -> Option<SmallRng> {
        Some(SmallRng::from_entropy())
    }

    async fn step(&self, rng: &mut SmallRng, rec: &Recorder, _deadline: &Deadline) {
        let params = [Value::from(self.snapshot.pick(rng))];
        if let Err(e) = rec.observe(self.db.query_row(&self.stmt, &params)).await {
            trace!("Select failed: {e}");
        }
    }
}

/// Bounded range scans between two random snapshot keys.
pub(super) struct Range {
    db: Arc<dyn Database>,
    stmt: Statement,
    snapshot: KeySnapshot,
    limit: i64,
}

#[async_trait]
impl Operation for Range {
    const NAME: &'static str = "range";

    type Worker = SmallRng;

    fn build(ctx: &PassContext) -> Option<Self> {
        Some(Self {
            snapshot: ctx.snapshot_with(2)?,
            stmt: Statement::new(Op::RangeSelect, ctx.db.engine().dialect()),
            db: ctx.db.clone(),
            limit: i64::try_from(ctx.range_limit).unwrap_or(i64::MAX),
        })
    }

    async fn prepare(&self) -> Result<(), DbError> {
        self.db.prepare(&self.stmt).await
    }

    fn worker(&self, _slot: usize) -> Option<SmallRng> {
        Some(SmallRng::from_entropy())
    }

    async fn step(&self, rng: &mut SmallRng, rec: &Recorder, _deadline: &Deadline) {
        let (lo, hi) = self.snapshot.pick_range(rng);
        let params = [Value::from(lo), Value::from(hi), Value::Int(self.limit)];
        // Rows are drained inside `query`, so the sample covers the whole result.
        if let Err(e) = rec.observe(self.db.query(&self.stmt, &params)).await {
            trace!("Range failed: {e}");
        }
    }
}
