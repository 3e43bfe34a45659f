use crate::backend::{Database, Op, Statement, Value};
use crate::error::DbError;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use sqlbench_core::SEED_VALUE_SIZE;
use std::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

pub fn seed_key(i: usize) -> String {
    format!("key-{i:08}")
}

/// Empties `kv` and fills it with `rows` keys, `batch` rows per transaction.
///
/// Keys are `key-00000000` upwards with random 64-byte values. Any failure aborts the load.
#[instrument(name = "load", skip(db), fields(engine = %db.engine()))]
pub async fn load(db: &dyn Database, rows: usize, batch: usize) -> Result<(), DbError> {
    let dialect = db.engine().dialect();
    let truncate = Statement::new(Op::Truncate, dialect);
    let insert = Statement::new(Op::Insert, dialect);
    let batch = batch.max(1);

    let start = Instant::now();
    let removed = db.execute(&truncate, &[]).await?;
    debug!("Truncated {removed} rows");

    let mut rng = SmallRng::from_entropy();
    let mut next = 0;
    while next < rows {
        let end = (next + batch).min(rows);

        let mut tx = db.begin().await?;
        tx.prepare(&insert).await?;
        for i in next..end {
            let mut value = vec![0u8; SEED_VALUE_SIZE];
            rng.fill_bytes(&mut value);
            tx.execute(&insert, &[Value::Text(seed_key(i)), Value::Bytes(value)])
                .await?;
        }
        tx.commit().await?;

        trace!("Loaded rows {next}..{end}");
        next = end;
    }

    info!("Loaded {rows} rows in {:?}", start.elapsed());
    Ok(())
}
