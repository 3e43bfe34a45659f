use crate::keyspace::SnapshotError;
use sqlbench_core::{ConfigError, Engine};
use thiserror::Error;

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No rows returned")]
    NoRows,

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid statement parameter: {0}")]
    Param(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Transaction already finished")]
    Finished,

    #[error("{0}")]
    Other(String),
}

impl From<bb8::RunError<DbError>> for DbError {
    fn from(err: bb8::RunError<DbError>) -> Self {
        match err {
            bb8::RunError::User(e) => e,
            bb8::RunError::TimedOut => DbError::Pool("timed out waiting for a connection".into()),
        }
    }
}

/// Failures that abort a whole benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to connect to {engine}: {source}")]
    Connect {
        engine: Engine,
        #[source]
        source: DbError,
    },

    #[error("Schema initialization failed on {engine}: {source}")]
    Schema {
        engine: Engine,
        #[source]
        source: DbError,
    },

    #[error("Loading {rows} rows into {engine} failed: {source}")]
    Load {
        engine: Engine,
        rows: usize,
        #[source]
        source: DbError,
    },

    #[error("Keyspace snapshot failed on {engine}: {source}")]
    Snapshot {
        engine: Engine,
        #[source]
        source: SnapshotError,
    },
}
