use crate::constants::{
    DEFAULT_DURATION, DEFAULT_RANGE_LIMIT, DEFAULT_ROWS, DEFAULT_SNAPSHOT_LIMIT, DEFAULT_WARMUP,
};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Supported SQL backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Sqlite,
    Postgres,
    Memory,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Sqlite, Engine::Postgres, Engine::Memory];

    pub fn name(self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Postgres => "postgres",
            Engine::Memory => "memory",
        }
    }

    /// Placeholder style understood by the engine.
    pub fn dialect(self) -> Dialect {
        match self {
            Engine::Postgres => Dialect::Numbered,
            Engine::Sqlite | Engine::Memory => Dialect::Positional,
        }
    }

    /// DSN used when none was configured.
    pub fn default_dsn(self) -> &'static str {
        match self {
            Engine::Sqlite => "./data/sqlite/sqlite.db",
            Engine::Postgres => "postgres://postgres:pg@127.0.0.1:5432/bench?sslmode=disable",
            Engine::Memory => "memory",
        }
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            "postgres" | "postgresql" | "pg" | "pgx" => Ok(Engine::Postgres),
            "memory" | "mem" => Ok(Engine::Memory),
            _ => Err(ConfigError::UnknownEngine(s.to_string())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter placeholder flavour of a SQL dialect.
///
/// Resolved once when a workload is built, never inside the hot loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?`, `?`, `?`
    Positional,
    /// `$1`, `$2`, `$3`
    Numbered,
}

impl Dialect {
    /// Renders a statement template written with `?` placeholders.
    pub fn render(self, template: &str) -> String {
        match self {
            Dialect::Positional => template.to_string(),
            Dialect::Numbered => {
                let mut out = String::with_capacity(template.len() + 8);
                let mut n = 0;
                for c in template.chars() {
                    if c == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }
}

/// Fully resolved benchmark configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    pub engine: Engine,
    /// Empty means [`Engine::default_dsn`].
    pub dsn: String,
    pub concurrency: usize,
    pub warmup: Duration,
    pub duration: Duration,
    /// Writes per insert transaction. Zero is treated as one.
    pub tx_batch: usize,
    /// Rows seeded before the workloads run. Zero skips seeding.
    pub rows: usize,
    pub snapshot_limit: usize,
    pub range_limit: usize,
    /// Optional cap on operations per second for each pass.
    pub max_tps: Option<NonZeroU32>,
}

impl BenchConfig {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            dsn: String::new(),
            concurrency: 1,
            warmup: DEFAULT_WARMUP,
            duration: DEFAULT_DURATION,
            tx_batch: 1,
            rows: DEFAULT_ROWS,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            range_limit: DEFAULT_RANGE_LIMIT,
            max_tps: None,
        }
    }

    pub fn dsn(&self) -> &str {
        if self.dsn.is_empty() {
            self.engine.default_dsn()
        } else {
            &self.dsn
        }
    }

    pub fn batch_size(&self) -> usize {
        self.tx_batch.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::Invalid("duration must be non-zero".into()));
        }
        if self.snapshot_limit == 0 {
            return Err(ConfigError::Invalid("snapshot limit must be at least 1".into()));
        }
        if self.range_limit == 0 {
            return Err(ConfigError::Invalid("range limit must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new(Engine::Sqlite)
    }
}

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "engine={} concurrency={} warmup={} duration={} tx_batch={} rows={}",
            self.engine,
            self.concurrency,
            humantime::format_duration(self.warmup),
            humantime::format_duration(self.duration),
            self.batch_size(),
            self.rows,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_aliases() {
        assert_eq!("sqlite3".parse::<Engine>(), Ok(Engine::Sqlite));
        assert_eq!("PGX".parse::<Engine>(), Ok(Engine::Postgres));
        assert_eq!(" mem ".parse::<Engine>(), Ok(Engine::Memory));
        assert_eq!(
            "chai".parse::<Engine>(),
            Err(ConfigError::UnknownEngine("chai".to_string()))
        );
    }

    #[test]
    fn every_engine_parses_its_own_name() {
        for engine in Engine::ALL {
            assert_eq!(engine.name().parse::<Engine>(), Ok(engine));
            assert_eq!(engine.to_string(), engine.name());
            assert!(!engine.default_dsn().is_empty());
        }
    }

    #[test]
    fn numbered_placeholders() {
        let sql = "SELECT k,v FROM kv WHERE k BETWEEN ? AND ? LIMIT ?";
        assert_eq!(Dialect::Positional.render(sql), sql);
        assert_eq!(
            Dialect::Numbered.render(sql),
            "SELECT k,v FROM kv WHERE k BETWEEN $1 AND $2 LIMIT $3"
        );
    }

    #[test]
    fn empty_dsn_falls_back_to_engine_default() {
        let mut config = BenchConfig::new(Engine::Postgres);
        assert_eq!(config.dsn(), Engine::Postgres.default_dsn());
        config.dsn = "postgres://localhost/other".into();
        assert_eq!(config.dsn(), "postgres://localhost/other");
    }

    #[test]
    fn validation() {
        let config = BenchConfig::new(Engine::Memory);
        assert!(config.validate().is_ok());

        let zero = BenchConfig {
            concurrency: 0,
            ..config.clone()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let unbatched = BenchConfig {
            tx_batch: 0,
            ..config
        };
        assert_eq!(unbatched.batch_size(), 1);
    }
}
