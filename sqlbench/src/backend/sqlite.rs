use super::{Database, Row, Statement, Transaction, Value};
use crate::error::DbError;
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use sqlbench_core::Engine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq)]
enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    /// Accepts plain paths as well as `file:` URIs; query parameters are ignored.
    fn parse(dsn: &str) -> Self {
        let path = dsn.strip_prefix("file:").unwrap_or(dsn);
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            Location::Memory
        } else {
            Location::File(PathBuf::from(path))
        }
    }
}

/// bb8 manager for rusqlite connections.
///
/// rusqlite connections are blocking and `!Sync`, so each one lives behind a mutex and every
/// call runs on the blocking pool.
struct SqliteManager {
    location: Location,
}

impl SqliteManager {
    fn create_connection(&self) -> Result<Connection, DbError> {
        let conn = match &self.location {
            Location::File(path) => Connection::open(path)?,
            Location::Memory => Connection::open_in_memory()?,
        };

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;",
        )?;

        Ok(conn)
    }
}

#[derive(Clone)]
struct SqliteConnection {
    inner: Arc<Mutex<Connection>>,
}

impl SqliteConnection {
    async fn with_connection<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await
        .map_err(|e| DbError::TaskJoin(e.to_string()))?
    }
}

impl bb8::ManageConnection for SqliteManager {
    type Connection = SqliteConnection;
    type Error = DbError;

    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let manager = SqliteManager {
            location: self.location.clone(),
        };
        async move {
            tokio::task::spawn_blocking(move || {
                manager.create_connection().map(|conn| SqliteConnection {
                    inner: Arc::new(Mutex::new(conn)),
                })
            })
            .await
            .map_err(|e| DbError::TaskJoin(e.to_string()))?
        }
    }

    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        let conn = conn.clone();
        async move {
            conn.with_connection(|c| c.execute_batch("SELECT 1").map_err(DbError::from))
                .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

type Pooled = bb8::PooledConnection<'static, SqliteManager>;

pub struct SqliteDatabase {
    pool: bb8::Pool<SqliteManager>,
}

impl SqliteDatabase {
    pub async fn open(dsn: &str, max_connections: u32) -> Result<Self, DbError> {
        let location = Location::parse(dsn);

        // NOTE: Every in-memory connection is a separate database, so the pool must not grow.
        let max_size = match &location {
            Location::Memory => 1,
            Location::File(path) => {
                ensure_parent(path)?;
                max_connections
            }
        };
        debug!("Opening SQLite at {location:?} with pool size {max_size}");

        let mut builder = bb8::Pool::builder().max_size(max_size);
        if location == Location::Memory {
            // Recycling the only connection would drop the whole database.
            builder = builder.idle_timeout(None).max_lifetime(None);
        }
        let pool = builder.build(SqliteManager { location }).await?;

        Ok(Self { pool })
    }
}

fn ensure_parent(path: &Path) -> Result<(), DbError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let conn = self.pool.get().await?;
        let sql = sql.to_string();
        conn.with_connection(move |c| Ok(c.execute_batch(&sql)?))
            .await
    }

    async fn prepare(&self, stmt: &Statement) -> Result<(), DbError> {
        let conn = self.pool.get().await?;
        prepare_on(&conn, stmt).await
    }

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        let conn = self.pool.get().await?;
        execute_on(&conn, stmt, params).await
    }

    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let conn = self.pool.get().await?;
        let sql = stmt.shared_sql();
        let params = params.to_vec();
        conn.with_connection(move |c| {
            let mut prepared = c.prepare_cached(&sql)?;
            let columns = prepared.column_count();
            let mut rows = prepared.query(params_from_iter(params.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns);
                for i in 0..columns {
                    values.push(Value::from(row.get_ref(i)?));
                }
                out.push(values);
            }
            Ok(out)
        })
        .await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let conn = self.pool.get_owned().await?;
        conn.with_connection(|c| Ok(c.execute_batch("BEGIN IMMEDIATE")?))
            .await?;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }
}

async fn prepare_on(conn: &SqliteConnection, stmt: &Statement) -> Result<(), DbError> {
    let sql = stmt.shared_sql();
    conn.with_connection(move |c| {
        c.prepare_cached(&sql)?;
        Ok(())
    })
    .await
}

async fn execute_on(
    conn: &SqliteConnection,
    stmt: &Statement,
    params: &[Value],
) -> Result<u64, DbError> {
    let sql = stmt.shared_sql();
    let params = params.to_vec();
    conn.with_connection(move |c| {
        let mut prepared = c.prepare_cached(&sql)?;
        let changed = prepared.execute(params_from_iter(params.iter()))?;
        Ok(changed as u64)
    })
    .await
}

/// Holds its pooled connection until commit or rollback.
struct SqliteTransaction {
    conn: Option<Pooled>,
}

impl SqliteTransaction {
    fn conn(&self) -> Result<&Pooled, DbError> {
        self.conn.as_ref().ok_or(DbError::Finished)
    }

    async fn finish(&mut self, sql: &'static str) -> Result<(), DbError> {
        let conn = self.conn.take().ok_or(DbError::Finished)?;
        conn.with_connection(move |c| Ok(c.execute_batch(sql)?))
            .await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn prepare(&mut self, stmt: &Statement) -> Result<(), DbError> {
        prepare_on(self.conn()?, stmt).await
    }

    async fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        execute_on(self.conn()?, stmt, params).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // The connection goes back to the pool only after the rollback ran on it.
        let rollback = move || {
            let guard = conn.inner.blocking_lock();
            if let Err(e) = guard.execute_batch("ROLLBACK") {
                debug!("Rollback of abandoned transaction failed: {e}");
            }
            drop(guard);
            drop(conn);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(rollback);
            }
            Err(_) => rollback(),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(i) => ToSqlOutput::from(*i),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Bytes(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Text(f.to_string()),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Op;
    use sqlbench_core::Dialect;

    const DDL: &str = "CREATE TABLE IF NOT EXISTS kv (k TEXT NOT NULL, v BLOB);
                       CREATE UNIQUE INDEX IF NOT EXISTS kv_k ON kv(k);";

    fn stmt(op: Op) -> Statement {
        Statement::new(op, Dialect::Positional)
    }

    #[test]
    fn dsn_locations() {
        assert_eq!(Location::parse(":memory:"), Location::Memory);
        assert_eq!(Location::parse(""), Location::Memory);
        assert_eq!(
            Location::parse("file:./data/x.db?cache=shared"),
            Location::File(PathBuf::from("./data/x.db"))
        );
        assert_eq!(
            Location::parse("/tmp/bench.db"),
            Location::File(PathBuf::from("/tmp/bench.db"))
        );
    }

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let db = SqliteDatabase::open(":memory:", 8).await.unwrap();
        db.execute_batch(DDL).await.unwrap();

        let n = db
            .execute(&stmt(Op::Insert), &["a".into(), b"x".as_slice().into()])
            .await
            .unwrap();
        assert_eq!(n, 1);

        let row = db.query_row(&stmt(Op::PointSelect), &["a".into()]).await.unwrap();
        assert_eq!(row, vec![Value::Bytes(b"x".to_vec())]);

        let missing = db.query_row(&stmt(Op::PointSelect), &["zz".into()]).await;
        assert!(matches!(missing, Err(DbError::NoRows)));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bench.db");
        let db = SqliteDatabase::open(path.to_str().unwrap(), 2).await.unwrap();
        db.execute_batch(DDL).await.unwrap();
        assert!(path.exists());

        let mut tx = db.begin().await.unwrap();
        tx.execute(&stmt(Op::Insert), &["a".into(), b"x".as_slice().into()])
            .await
            .unwrap();
        drop(tx);

        let mut tx = db.begin().await.unwrap();
        tx.execute(&stmt(Op::Insert), &["b".into(), b"y".as_slice().into()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let keys = db
            .query(&stmt(Op::Snapshot), &[Value::Int(10)])
            .await
            .unwrap();
        assert_eq!(keys, vec![vec![Value::Text("b".into())]]);
    }
}
