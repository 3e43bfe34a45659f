//! A scriptable [`Database`] for exercising workloads without a real engine.
use async_trait::async_trait;
use rand_distr::{Distribution, Normal};
use sqlbench::{Database, DbError, Op, Row, Statement, Transaction, Value};
use sqlbench_core::Engine;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tracing::trace;

#[derive(Clone, Debug)]
pub struct MockConfig {
    /// Engine reported to callers, which decides the statement dialect.
    pub engine: Engine,
    /// Time every call takes.
    pub latency: Duration,
    /// Standard deviation of a normal jitter around `latency`.
    pub jitter: Option<Duration>,
    /// Every statement fails after its latency.
    pub fail: bool,
    /// `prepare` fails.
    pub fail_prepare: bool,
    /// `begin` fails after its latency.
    pub fail_begin: bool,
    /// `commit` fails.
    pub fail_commit: bool,
    /// Every `n`th statement fails, counting from the first call.
    pub fail_every: Option<u64>,
    /// Rows returned for the snapshot query.
    pub keys: Vec<String>,
    /// Keep every call for later inspection.
    pub record_calls: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Sqlite,
            latency: Duration::from_millis(1),
            jitter: None,
            fail: false,
            fail_prepare: false,
            fail_begin: false,
            fail_commit: false,
            fail_every: None,
            keys: vec![],
            record_calls: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub op: Op,
    pub params: Vec<Value>,
    /// Transaction the call ran in, numbered from 1 in `begin` order.
    pub tx: Option<u64>,
}

struct Inner {
    config: MockConfig,
    jitter: Option<Normal<f64>>,
    calls: Mutex<Vec<Call>>,
    count: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
}

impl Inner {
    async fn call(&self, stmt: &Statement, params: &[Value], tx: Option<u64>) -> Result<(), DbError> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.record_calls {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(Call {
                    op: stmt.op(),
                    params: params.to_vec(),
                    tx,
                });
            }
        }

        tokio::time::sleep(self.delay()).await;

        let nth = self.config.fail_every.is_some_and(|every| every > 0 && n % every == 0);
        if self.config.fail || nth {
            trace!("Mock failing {:?} (call {n})", stmt.op());
            return Err(DbError::Other("mock failure".into()));
        }
        Ok(())
    }

    fn delay(&self) -> Duration {
        let base = self.config.latency;
        match &self.jitter {
            Some(normal) => {
                let nanos = normal.sample(&mut rand::thread_rng());
                Duration::from_nanos(nanos.max(0.) as u64)
            }
            None => base,
        }
    }
}

#[derive(Clone)]
pub struct MockDatabase {
    inner: Arc<Inner>,
}

impl MockDatabase {
    pub fn new(config: MockConfig) -> Self {
        let jitter = config.jitter.and_then(|std_dev| {
            Normal::new(
                config.latency.as_nanos() as f64,
                std_dev.as_nanos() as f64,
            )
            .ok()
        });
        Self {
            inner: Arc::new(Inner {
                config,
                jitter,
                calls: Mutex::new(vec![]),
                count: AtomicU64::new(0),
                begins: AtomicU64::new(0),
                commits: AtomicU64::new(0),
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Total statements issued, including failed ones.
    pub fn call_count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Transactions opened, including failed attempts.
    pub fn begin_count(&self) -> u64 {
        self.inner.begins.load(Ordering::Relaxed)
    }

    /// Commits attempted, including failed ones.
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Database for MockDatabase {
    fn engine(&self) -> Engine {
        self.inner.config.engine
    }

    async fn execute_batch(&self, _sql: &str) -> Result<(), DbError> {
        Ok(())
    }

    async fn prepare(&self, stmt: &Statement) -> Result<(), DbError> {
        if self.inner.config.fail_prepare {
            return Err(DbError::Other(format!("mock cannot prepare {:?}", stmt.op())));
        }
        Ok(())
    }

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        self.inner.call(stmt, params, None).await?;
        Ok(1)
    }

    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.inner.call(stmt, params, None).await?;
        let rows = match stmt.op() {
            Op::Snapshot => {
                let limit = params
                    .first()
                    .and_then(Value::as_int)
                    .and_then(|n| usize::try_from(n).ok())
                    .unwrap_or(usize::MAX);
                let mut keys = self.inner.config.keys.clone();
                keys.sort_unstable_by(|a, b| b.cmp(a));
                keys.into_iter()
                    .take(limit)
                    .map(|k| vec![Value::Text(k)])
                    .collect()
            }
            _ => vec![vec![Value::Bytes(b"mock".to_vec())]],
        };
        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let id = self.inner.begins.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.inner.delay()).await;
        if self.inner.config.fail_begin {
            return Err(DbError::Other("mock cannot begin".into()));
        }
        Ok(Box::new(MockTransaction {
            inner: self.inner.clone(),
            id,
        }))
    }
}

struct MockTransaction {
    inner: Arc<Inner>,
    id: u64,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn prepare(&mut self, _stmt: &Statement) -> Result<(), DbError> {
        if self.inner.config.fail_prepare {
            return Err(DbError::Other("mock cannot prepare".into()));
        }
        Ok(())
    }

    async fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        self.inner.call(stmt, params, Some(self.id)).await?;
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
        if self.inner.config.fail_commit {
            return Err(DbError::Other(format!("mock cannot commit transaction {}", self.id)));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
