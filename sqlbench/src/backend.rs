//! Pluggable SQL backends.
//!
//! Every engine exposes the same small relational surface over the `kv` table. Workloads talk to
//! it through typed [`Statement`]s whose SQL text is rendered once for the engine's dialect.
mod memory;
mod postgres;
mod sqlite;

pub use memory::MemoryDatabase;
pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

use crate::error::{BenchError, DbError};
use async_trait::async_trait;
use sqlbench_core::{Dialect, Engine};
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

pub type Row = Vec<Value>;

/// The fixed set of statements issued against the `kv` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `(k, v)`
    Insert,
    /// `(k)` -> `[v]`
    PointSelect,
    /// `(lo, hi, limit)` -> `[k, v]*`
    RangeSelect,
    /// `(v, k)`
    Update,
    /// `(k)`
    Delete,
    /// `(limit)` -> `[k]*`, descending
    Snapshot,
    /// `()`
    Truncate,
}

impl Op {
    fn template(self) -> &'static str {
        match self {
            Op::Insert => "INSERT INTO kv(k, v) VALUES(?, ?)",
            Op::PointSelect => "SELECT v FROM kv WHERE k = ?",
            Op::RangeSelect => "SELECT k, v FROM kv WHERE k BETWEEN ? AND ? LIMIT ?",
            Op::Update => "UPDATE kv SET v = ? WHERE k = ?",
            Op::Delete => "DELETE FROM kv WHERE k = ?",
            Op::Snapshot => "SELECT k FROM kv ORDER BY k DESC LIMIT ?",
            Op::Truncate => "DELETE FROM kv",
        }
    }
}

/// A statement rendered for one dialect.
#[derive(Debug, Clone)]
pub struct Statement {
    op: Op,
    sql: Arc<str>,
}

impl Statement {
    pub fn new(op: Op, dialect: Dialect) -> Self {
        Self {
            op,
            sql: dialect.render(op.template()).into(),
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn shared_sql(&self) -> Arc<str> {
        self.sql.clone()
    }
}

/// A connection handle shared by every worker of a workload.
///
/// Implementations pool or serialize internally; callers never add locking of their own.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    fn engine(&self) -> Engine;

    /// Runs raw SQL (DDL) that returns no rows.
    async fn execute_batch(&self, sql: &str) -> Result<(), DbError>;

    /// Validates a statement ahead of a workload so failures surface once.
    async fn prepare(&self, stmt: &Statement) -> Result<(), DbError>;

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError>;

    /// Runs a query and drains every row before returning.
    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, DbError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;

    /// Exactly one row is expected; an empty result is [`DbError::NoRows`].
    async fn query_row(&self, stmt: &Statement, params: &[Value]) -> Result<Row, DbError> {
        self.query(stmt, params)
            .await?
            .into_iter()
            .next()
            .ok_or(DbError::NoRows)
    }
}

#[async_trait]
pub trait Transaction: Send {
    async fn prepare(&mut self, stmt: &Statement) -> Result<(), DbError>;

    async fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Opens a pooled connection handle for `engine`.
#[instrument(skip(dsn))]
pub async fn open(
    engine: Engine,
    dsn: &str,
    max_connections: u32,
) -> Result<Arc<dyn Database>, BenchError> {
    let max_connections = max_connections.max(1);
    let db: Result<Arc<dyn Database>, DbError> = match engine {
        Engine::Sqlite => SqliteDatabase::open(dsn, max_connections)
            .await
            .map(|db| Arc::new(db) as Arc<dyn Database>),
        Engine::Postgres => PostgresDatabase::open(dsn, max_connections)
            .await
            .map(|db| Arc::new(db) as Arc<dyn Database>),
        Engine::Memory => Ok(Arc::new(MemoryDatabase::new())),
    };

    let db = db.map_err(|source| BenchError::Connect { engine, source })?;
    debug!("Opened {engine} with up to {max_connections} connections");
    Ok(db)
}

/// Like [`open`], resolving the engine from its name.
pub async fn open_named(
    engine: &str,
    dsn: &str,
    max_connections: u32,
) -> Result<Arc<dyn Database>, BenchError> {
    let engine: Engine = engine.parse()?;
    open(engine, dsn, max_connections).await
}
