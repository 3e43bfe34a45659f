use super::{Database, Row, Statement, Transaction, Value};
use crate::error::DbError;
use async_trait::async_trait;
use bb8::ManageConnection;
use sqlbench_core::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

static NULL: Option<String> = None;

struct PgManager {
    config: Config,
}

/// A client plus the statements already prepared on it.
struct PgConnection {
    client: Client,
    statements: HashMap<Arc<str>, tokio_postgres::Statement>,
}

impl PgConnection {
    async fn statement(&mut self, stmt: &Statement) -> Result<tokio_postgres::Statement, DbError> {
        if let Some(prepared) = self.statements.get(stmt.sql()) {
            return Ok(prepared.clone());
        }

        let prepared = self.client.prepare(stmt.sql()).await?;
        self.statements.insert(stmt.shared_sql(), prepared.clone());
        Ok(prepared)
    }

    async fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        let prepared = self.statement(stmt).await?;
        Ok(self.client.execute(&prepared, &bind(params)).await?)
    }

    async fn query(&mut self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let prepared = self.statement(stmt).await?;
        let rows = self.client.query(&prepared, &bind(params)).await?;
        rows.iter().map(decode).collect()
    }
}

impl bb8::ManageConnection for PgManager {
    type Connection = PgConnection;
    type Error = DbError;

    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let config = self.config.clone();
        async move {
            let (client, connection) = config.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Postgres connection error: {e}");
                }
            });
            Ok(PgConnection {
                client,
                statements: HashMap::new(),
            })
        }
    }

    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        async move {
            conn.client.simple_query("SELECT 1").await?;
            Ok(())
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.client.is_closed()
    }
}

pub struct PostgresDatabase {
    pool: bb8::Pool<PgManager>,
}

impl PostgresDatabase {
    pub async fn open(dsn: &str, max_connections: u32) -> Result<Self, DbError> {
        let config: Config = dsn.parse()?;
        debug!("Opening Postgres pool with size {max_connections}");

        let manager = PgManager { config };
        // NOTE: The pool retries failed connects until its timeout, so probe once directly.
        let probe = manager.connect().await?;
        drop(probe);

        let pool = bb8::Pool::builder()
            .max_size(max_connections)
            .build(manager)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let conn = self.pool.get().await?;
        conn.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn prepare(&self, stmt: &Statement) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.statement(stmt).await?;
        Ok(())
    }

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        let mut conn = self.pool.get().await?;
        conn.execute(stmt, params).await
    }

    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.get().await?;
        conn.query(stmt, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let conn = self.pool.get_owned().await?;
        conn.client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction { conn: Some(conn) }))
    }
}

struct PgTransaction {
    conn: Option<bb8::PooledConnection<'static, PgManager>>,
}

impl PgTransaction {
    async fn finish(&mut self, sql: &str) -> Result<(), DbError> {
        let conn = self.conn.take().ok_or(DbError::Finished)?;
        conn.client.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn prepare(&mut self, stmt: &Statement) -> Result<(), DbError> {
        let conn = self.conn.as_mut().ok_or(DbError::Finished)?;
        conn.statement(stmt).await?;
        Ok(())
    }

    async fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        let conn = self.conn.as_mut().ok_or(DbError::Finished)?;
        conn.execute(stmt, params).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            if let Err(e) = conn.client.batch_execute("ROLLBACK").await {
                debug!("Rollback of abandoned transaction failed: {e}");
            }
        });
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|value| -> &(dyn ToSql + Sync) {
            match value {
                Value::Null => &NULL,
                Value::Int(i) => i,
                Value::Text(s) => s,
                Value::Bytes(b) => b,
            }
        })
        .collect()
}

fn decode(row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(i)?.map(Value::Text)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.map(Value::Bytes)
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(Value::Int)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?.map(|v| Value::Int(v.into()))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?.map(|v| Value::Int(v.into()))
        } else {
            return Err(DbError::Unsupported(format!(
                "column {} has type {ty}",
                column.name()
            )));
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dsn_parses() {
        let config: Config = Engine::Postgres.default_dsn().parse().unwrap();
        assert_eq!(config.get_dbname(), Some("bench"));
        assert_eq!(config.get_user(), Some("postgres"));
    }

    #[test]
    fn binds_every_value_kind() {
        let params = [
            Value::Text("k".into()),
            Value::Bytes(vec![1, 2]),
            Value::Int(7),
            Value::Null,
        ];
        assert_eq!(bind(&params).len(), 4);
    }
}
