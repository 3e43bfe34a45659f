use super::{Operation, PassContext};
use crate::aggregator::Recorder;
use crate::backend::{Database, Op, Statement, Value};
use crate::error::DbError;
use crate::idgen::{self, IdGenerator, MAX_NODE};
use crate::pace::Deadline;
use async_trait::async_trait;
use sqlbench_core::INSERT_PAYLOAD;
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Batched write transactions of freshly generated keys.
pub(super) struct Insert {
    db: Arc<dyn Database>,
    stmt: Statement,
    batch: usize,
    first_node: u32,
}

#[async_trait]
impl Operation for Insert {
    const NAME: &'static str = "insert";

    type Worker = IdGenerator;

    fn build(ctx: &PassContext) -> Option<Self> {
        Some(Self {
            stmt: Statement::new(Op::Insert, ctx.db.engine().dialect()),
            db: ctx.db.clone(),
            batch: ctx.tx_batch.max(1),
            first_node: ctx.first_node,
        })
    }

    fn permits(&self) -> usize {
        self.batch
    }

    // NOTE: Inserts prepare inside each transaction.
    async fn prepare(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn worker(&self, slot: usize) -> Option<IdGenerator> {
        let node = (self.first_node as u64 + slot as u64) & MAX_NODE as u64;
        match idgen::generator_for_worker(node as u32) {
            Ok(gen) => Some(gen),
            Err(e) => {
                warn!("Cannot create key generator for node {node}: {e}");
                None
            }
        }
    }

    async fn step(&self, gen: &mut IdGenerator, rec: &Recorder, deadline: &Deadline) {
        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                trace!("Begin failed: {e}");
                rec.error();
                return;
            }
        };
        if let Err(e) = tx.prepare(&self.stmt).await {
            trace!("Prepare failed: {e}");
            rec.error();
            if let Err(e) = tx.rollback().await {
                trace!("Rollback failed: {e}");
            }
            return;
        }

        for _ in 0..self.batch {
            if deadline.expired() {
                break;
            }
            let key = match gen.generate() {
                Ok(key) => key,
                Err(e) => {
                    trace!("Key generation failed on node {}: {e}", gen.node());
                    rec.error();
                    continue;
                }
            };

            let params = [Value::Text(key), Value::Bytes(INSERT_PAYLOAD.to_vec())];
            if let Err(e) = rec.observe(tx.execute(&self.stmt, &params)).await {
                trace!("Insert failed: {e}");
            }
        }

        if let Err(e) = tx.commit().await {
            trace!("Commit failed: {e}");
            rec.error();
        }
    }
}
