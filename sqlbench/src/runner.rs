use crate::backend::{self, Database};
use crate::error::BenchError;
use crate::keyspace::KeySnapshot;
use crate::loader;
use crate::pace::{Deadline, Pacer};
use crate::schema;
use crate::workload::{PassContext, Workload};
use sqlbench_core::{BenchConfig, Measurement, SEED_BATCH};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    SchemaReady,
    Seeded,
    SnapshotReady,
    Running(Workload),
    Done,
}

/// Drives one benchmark run: schema, seed, snapshot, then every workload in order.
///
/// Each workload gets an optional warmup pass whose result is dropped, followed by the measured
/// pass. Passes never overlap.
pub struct Runner {
    config: BenchConfig,
    cancel: CancellationToken,
    stage: Stage,
    passes: u64,
}

impl Runner {
    pub fn new(config: BenchConfig) -> Result<Self, BenchError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            stage: Stage::Idle,
            passes: 0,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Cancelling this token ends the current pass early. Remaining passes finish immediately.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[instrument(name = "run", skip_all, fields(engine = %self.config.engine))]
    pub async fn run(&mut self) -> Result<Vec<Measurement>, BenchError> {
        let max_connections = u32::try_from(self.config.concurrency + 1).unwrap_or(u32::MAX);
        let db = backend::open(self.config.engine, self.config.dsn(), max_connections).await?;
        self.run_with(db).await
    }

    /// Runs against an already opened database.
    pub async fn run_with(&mut self, db: Arc<dyn Database>) -> Result<Vec<Measurement>, BenchError> {
        let engine = db.engine();
        info!("Running {engine} with config {}", self.config);

        schema::init(&*db)
            .await
            .map_err(|source| BenchError::Schema { engine, source })?;
        self.stage = Stage::SchemaReady;

        let rows = self.config.rows;
        if rows > 0 {
            loader::load(&*db, rows, SEED_BATCH)
                .await
                .map_err(|source| BenchError::Load {
                    engine,
                    rows,
                    source,
                })?;
        }
        self.stage = Stage::Seeded;

        // An empty table leaves nothing for select, range, update and delete to draw from.
        let snapshot = KeySnapshot::capture(&*db, self.config.snapshot_limit)
            .await
            .map_err(|source| BenchError::Snapshot { engine, source })?;
        self.stage = Stage::SnapshotReady;

        let mut ctx = PassContext {
            db,
            snapshot: Some(snapshot),
            concurrency: self.config.concurrency,
            duration: self.config.duration,
            tx_batch: self.config.batch_size(),
            range_limit: self.config.range_limit,
            pacer: Pacer::unlimited(),
            first_node: 0,
        };

        let mut results = Vec::with_capacity(Workload::ALL.len());
        for (i, workload) in Workload::ALL.into_iter().enumerate() {
            self.stage = Stage::Running(workload);
            info!("{}. {workload} workload start", i + 1);

            if !self.config.warmup.is_zero() {
                let warmup = self.pass(workload, &mut ctx, self.config.warmup).await;
                debug!("Discarding warmup of {workload}: {} ops", warmup.ops());
            }
            let measurement = self.pass(workload, &mut ctx, self.config.duration).await;
            debug!(
                "{workload}: {} ops, {} errors",
                measurement.ops(),
                measurement.errors()
            );
            results.push(measurement);
        }

        self.stage = Stage::Done;
        info!("All workloads completed");
        Ok(results)
    }

    async fn pass(
        &mut self,
        workload: Workload,
        ctx: &mut PassContext,
        duration: Duration,
    ) -> Measurement {
        // NOTE: Every pass gets fresh generator nodes, so warmup and measured keys never collide.
        let first_node = self.passes * self.config.concurrency as u64;
        ctx.first_node = (first_node % (crate::idgen::MAX_NODE as u64 + 1)) as u32;
        ctx.duration = duration;
        ctx.pacer = Pacer::new(self.config.max_tps, ctx.tx_batch);
        self.passes += 1;

        let deadline = Deadline::new(&self.cancel, duration);
        workload.run(ctx, &deadline).await
    }
}
