//! In-process engine that interprets the typed statements against an ordered map.
use super::{Database, Op, Row, Statement, Transaction, Value};
use crate::error::DbError;
use async_trait::async_trait;
use sqlbench_core::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Table = BTreeMap<String, Vec<u8>>;

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    table: Arc<RwLock<Table>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn engine(&self) -> Engine {
        Engine::Memory
    }

    async fn execute_batch(&self, _sql: &str) -> Result<(), DbError> {
        Ok(())
    }

    async fn prepare(&self, _stmt: &Statement) -> Result<(), DbError> {
        Ok(())
    }

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        let mut table = self.table.write().await;
        write(&mut table, stmt.op(), params).map(|(changed, _)| changed)
    }

    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let table = self.table.read().await;
        match stmt.op() {
            Op::PointSelect => {
                let key = text(params, 0)?;
                Ok(table
                    .get(key)
                    .map(|v| vec![Value::Bytes(v.clone())])
                    .into_iter()
                    .collect())
            }
            Op::RangeSelect => {
                let (lo, hi) = (text(params, 0)?, text(params, 1)?);
                let limit = limit(params, 2)?;
                // BETWEEN with inverted bounds matches nothing.
                if lo > hi {
                    return Ok(Vec::new());
                }
                Ok(table
                    .range::<str, _>((std::ops::Bound::Included(lo), std::ops::Bound::Included(hi)))
                    .take(limit)
                    .map(|(k, v)| vec![Value::Text(k.clone()), Value::Bytes(v.clone())])
                    .collect())
            }
            Op::Snapshot => {
                let limit = limit(params, 0)?;
                Ok(table
                    .keys()
                    .rev()
                    .take(limit)
                    .map(|k| vec![Value::Text(k.clone())])
                    .collect())
            }
            op => Err(DbError::Unsupported(format!("{op:?} returns no rows"))),
        }
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        Ok(Box::new(MemoryTransaction {
            table: self.table.clone(),
            staged: Vec::new(),
        }))
    }
}

/// Buffers writes and applies them atomically under one write lock at commit.
struct MemoryTransaction {
    table: Arc<RwLock<Table>>,
    staged: Vec<(Op, Vec<Value>)>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn prepare(&mut self, _stmt: &Statement) -> Result<(), DbError> {
        Ok(())
    }

    async fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64, DbError> {
        match stmt.op() {
            Op::Insert | Op::Update | Op::Delete => {
                text(params, key_index(stmt.op()))?;
                self.staged.push((stmt.op(), params.to_vec()));
                Ok(1)
            }
            op => Err(DbError::Unsupported(format!("{op:?} inside a transaction"))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let mut table = self.table.write().await;
        let mut undo = Vec::with_capacity(self.staged.len());
        for (op, params) in &self.staged {
            match write(&mut table, *op, params) {
                Ok((_, previous)) => undo.extend(previous),
                Err(e) => {
                    for (key, previous) in undo.into_iter().rev() {
                        match previous {
                            Some(v) => table.insert(key, v),
                            None => table.remove(&key),
                        };
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}

type Undo = (String, Option<Vec<u8>>);

/// Applies one write, returning the affected row count and how to revert it.
fn write(table: &mut Table, op: Op, params: &[Value]) -> Result<(u64, Option<Undo>), DbError> {
    match op {
        Op::Insert => {
            let key = text(params, 0)?;
            let value = bytes(params, 1)?;
            if table.contains_key(key) {
                return Err(DbError::DuplicateKey(key.to_string()));
            }
            table.insert(key.to_string(), value);
            Ok((1, Some((key.to_string(), None))))
        }
        Op::Update => {
            let value = bytes(params, 0)?;
            let key = text(params, 1)?;
            match table.get_mut(key) {
                Some(slot) => {
                    let previous = std::mem::replace(slot, value);
                    Ok((1, Some((key.to_string(), Some(previous)))))
                }
                None => Ok((0, None)),
            }
        }
        Op::Delete => {
            let key = text(params, 0)?;
            match table.remove(key) {
                Some(previous) => Ok((1, Some((key.to_string(), Some(previous))))),
                None => Ok((0, None)),
            }
        }
        Op::Truncate => {
            let removed = table.len() as u64;
            table.clear();
            Ok((removed, None))
        }
        op => Err(DbError::Unsupported(format!("{op:?} is not a write"))),
    }
}

fn key_index(op: Op) -> usize {
    match op {
        Op::Update => 1,
        _ => 0,
    }
}

fn text(params: &[Value], i: usize) -> Result<&str, DbError> {
    params
        .get(i)
        .and_then(Value::as_text)
        .ok_or_else(|| DbError::Param(format!("expected text at position {}", i + 1)))
}

fn bytes(params: &[Value], i: usize) -> Result<Vec<u8>, DbError> {
    match params.get(i) {
        Some(Value::Bytes(b)) => Ok(b.clone()),
        Some(Value::Text(s)) => Ok(s.as_bytes().to_vec()),
        _ => Err(DbError::Param(format!("expected bytes at position {}", i + 1))),
    }
}

fn limit(params: &[Value], i: usize) -> Result<usize, DbError> {
    params
        .get(i)
        .and_then(Value::as_int)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| DbError::Param(format!("expected a limit at position {}", i + 1)))
}
