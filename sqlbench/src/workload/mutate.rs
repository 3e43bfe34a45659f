use super::{Operation, PassContext};
use crate::aggregator::Recorder;
use crate::backend::{Database, Op, Statement, Value};
use crate::error::DbError;
use crate::keyspace::KeySnapshot;
use crate::pace::Deadline;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use sqlbench_core::UPDATE_PAYLOAD;
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

// NOTE: Keys may already be gone by the time these run. Zero affected rows is still a
// completed operation; only a failed statement counts as an error.

pub(super) struct Update {
    db: Arc<dyn Database>,
    stmt: Statement,
    snapshot: KeySnapshot,
}

#[async_trait]
impl Operation for Update {
    const NAME: &'static str = "update";

    type Worker = SmallRng;

    fn build(ctx: &PassContext) -> Option<Self> {
        Some(Self {
            snapshot: ctx.snapshot_with(1)?,
            stmt: Statement::new(Op::Update, ctx.db.engine().dialect()),
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
        let params = [
            Value::Bytes(UPDATE_PAYLOAD.to_vec()),
            Value::from(self.snapshot.pick(rng)),
        ];
        if let Err(e) = rec.observe(self.db.execute(&self.stmt, &params)).await {
            trace!("Update failed: {e}");
        }
    }
}

pub(super) struct Delete {
    db: Arc<dyn Database>,
    stmt: Statement,
    snapshot: KeySnapshot,
}

#[async_trait]
impl Operation for Delete {
    const NAME: &'static str = "delete";

    type Worker = SmallRng;

    fn build(ctx: &PassContext) -> Option<Self> {
        Some(Self {
            snapshot: ctx.snapshot_with(1)?,
            stmt: Statement::new(Op::Delete, ctx.db.engine().dialect()),
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
        if let Err(e) = rec.observe(self.db.execute(&self.stmt, &params)).await {
            trace!("Delete failed: {e}");
        }
    }
}
