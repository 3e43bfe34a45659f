#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod backend;
pub mod error;
pub mod idgen;
pub mod keyspace;
pub mod loader;
pub mod pace;
pub mod runner;
pub mod schema;
pub mod workload;

pub use backend::{Database, Op, Row, Statement, Transaction, Value};
pub use error::{BenchError, DbError};
pub use keyspace::{KeySnapshot, SnapshotError};
pub use runner::{Runner, Stage};
pub use workload::Workload;

pub mod prelude {
    pub use crate::backend::{self, Database};
    pub use crate::runner::Runner;
    pub use sqlbench_core::{BenchConfig, Engine, Measurement};
}
