use crate::backend::{Database, Op, Statement, Value};
use crate::error::DbError;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("The kv table is empty")]
    Empty,

    #[error("Snapshot query failed: {0}")]
    Query(#[from] DbError),
}

/// Existing keys in descending order, read once and shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct KeySnapshot(Arc<[String]>);

impl KeySnapshot {
    #[instrument(name = "snapshot", skip(db), fields(engine = %db.engine()))]
    pub async fn capture(db: &dyn Database, limit: usize) -> Result<Self, SnapshotError> {
        let stmt = Statement::new(Op::Snapshot, db.engine().dialect());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = db.query(&stmt, &[Value::Int(limit)]).await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_iter().next() {
                Some(Value::Text(k)) => keys.push(k),
                other => {
                    return Err(DbError::Unsupported(format!("snapshot key {other:?}")).into())
                }
            }
        }

        let snapshot = Self::from_keys(keys)?;
        debug!("Captured {} keys", snapshot.len());
        Ok(snapshot)
    }

    pub fn from_keys(keys: Vec<String>) -> Result<Self, SnapshotError> {
        if keys.is_empty() {
            return Err(SnapshotError::Empty);
        }
        Ok(Self(keys.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.0[rng.gen_range(0..self.0.len())]
    }

    /// Two independent draws ordered so that `lo <= hi`.
    pub fn pick_range<R: Rng + ?Sized>(&self, rng: &mut R) -> (&str, &str) {
        let a = self.pick(rng);
        let b = self.pick(rng);
        normalize_bounds(a, b)
    }
}

pub fn normalize_bounds<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
