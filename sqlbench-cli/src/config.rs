//! Layered configuration: defaults < YAML file < `CHB_*` environment < flags.
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use sqlbench_core::{BenchConfig, Engine};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug, Default)]
#[command(version, about = "Concurrent load benchmark for SQL engines")]
pub struct Cli {
    /// YAML config file. `config.yaml` is read when present.
    #[arg(long, env = "CHB_CONFIG")]
    pub config: Option<PathBuf>,

    /// sqlite, postgres or memory.
    #[arg(short, long, env = "CHB_ENGINE")]
    pub engine: Option<Engine>,

    /// Connection string. Empty means the engine's default.
    #[arg(long, env = "CHB_DSN")]
    pub dsn: Option<String>,

    #[arg(short, long, env = "CHB_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// e.g. `5s`, `500ms`.
    #[arg(long, env = "CHB_WARMUP", value_parser = humantime::parse_duration)]
    pub warmup: Option<Duration>,

    #[arg(short, long, env = "CHB_DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Rows per insert transaction.
    #[arg(long, env = "CHB_TX_BATCH")]
    pub tx_batch: Option<usize>,

    /// Rows seeded before the workloads. Zero skips seeding.
    #[arg(long, env = "CHB_ROWS")]
    pub rows: Option<usize>,

    #[arg(long, env = "CHB_SNAPSHOT_LIMIT")]
    pub snapshot_limit: Option<usize>,

    #[arg(long, env = "CHB_RANGE_LIMIT")]
    pub range_limit: Option<usize>,

    /// Operations per second cap for each pass.
    #[arg(long, env = "CHB_MAX_TPS")]
    pub max_tps: Option<NonZeroU32>,

    /// Print results as JSON.
    #[arg(long, env = "CHB_JSON")]
    pub json: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "CHB_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub engine: Option<String>,
    pub dsn: Option<String>,
    pub concurrency: Option<usize>,
    pub warmup: Option<String>,
    pub duration: Option<String>,
    pub tx_batch: Option<usize>,
    pub rows: Option<usize>,
    pub snapshot_limit: Option<usize>,
    pub range_limit: Option<usize>,
    pub max_tps: Option<NonZeroU32>,
}

impl FileConfig {
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

fn duration(field: &str, value: Option<&str>) -> Result<Option<Duration>> {
    value
        .map(|v| humantime::parse_duration(v).with_context(|| format!("invalid {field} {v:?}")))
        .transpose()
}

/// Flags (with their env fallbacks already applied by clap) win over the file.
pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<BenchConfig> {
    let engine = match (cli.engine, file.engine.as_deref()) {
        (Some(engine), _) => engine,
        (None, Some(name)) => name.parse()?,
        (None, None) => Engine::Sqlite,
    };
    let defaults = BenchConfig::new(engine);

    let config = BenchConfig {
        engine,
        dsn: cli
            .dsn
            .clone()
            .or_else(|| file.dsn.clone())
            .unwrap_or_default(),
        concurrency: cli
            .concurrency
            .or(file.concurrency)
            .unwrap_or(defaults.concurrency),
        warmup: cli
            .warmup
            .or(duration("warmup", file.warmup.as_deref())?)
            .unwrap_or(defaults.warmup),
        duration: cli
            .duration
            .or(duration("duration", file.duration.as_deref())?)
            .unwrap_or(defaults.duration),
        tx_batch: cli.tx_batch.or(file.tx_batch).unwrap_or(defaults.tx_batch),
        rows: cli.rows.or(file.rows).unwrap_or(defaults.rows),
        snapshot_limit: cli
            .snapshot_limit
            .or(file.snapshot_limit)
            .unwrap_or(defaults.snapshot_limit),
        range_limit: cli
            .range_limit
            .or(file.range_limit)
            .unwrap_or(defaults.range_limit),
        max_tps: cli.max_tps.or(file.max_tps),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sqlbench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_without_sources() {
        let config = resolve(&Cli::default(), &FileConfig::default()).unwrap();
        assert_eq!(config.engine, Engine::Sqlite);
        assert_eq!(config.dsn(), Engine::Sqlite.default_dsn());
        assert_eq!(config.warmup, Duration::from_secs(5));
        assert_eq!(config.duration, Duration::from_secs(20));
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig::parse(
            "engine: postgres\nconcurrency: 4\nwarmup: 1s\nduration: 2m\ntx_batch: 16\n",
        )
        .unwrap();
        let cli = cli(&["--concurrency", "32", "--duration", "250ms", "-e", "mem"]);

        let config = resolve(&cli, &file).unwrap();
        assert_eq!(config.engine, Engine::Memory);
        assert_eq!(config.concurrency, 32);
        assert_eq!(config.duration, Duration::from_millis(250));
        assert_eq!(config.warmup, Duration::from_secs(1));
        assert_eq!(config.tx_batch, 16);
    }

    #[test]
    fn file_engine_aliases() {
        let file = FileConfig::parse("engine: pgx\n").unwrap();
        let config = resolve(&Cli::default(), &file).unwrap();
        assert_eq!(config.engine, Engine::Postgres);

        let file = FileConfig::parse("engine: chai\n").unwrap();
        assert!(resolve(&Cli::default(), &file).is_err());
    }

    #[test]
    fn env_sits_between_file_and_flags() {
        std::env::set_var("CHB_SNAPSHOT_LIMIT", "77");
        let file = FileConfig::parse("snapshot_limit: 5\n").unwrap();

        let from_env = resolve(&cli(&[]), &file).unwrap();
        assert_eq!(from_env.snapshot_limit, 77);

        let from_flag = resolve(&cli(&["--snapshot-limit", "9"]), &file).unwrap();
        assert_eq!(from_flag.snapshot_limit, 9);
        std::env::remove_var("CHB_SNAPSHOT_LIMIT");
    }

    #[test]
    fn bad_values_are_reported() {
        let file = FileConfig::parse("warmup: soon\n").unwrap();
        assert!(resolve(&Cli::default(), &file).is_err());

        assert!(FileConfig::parse("concurency: 3\n").is_err());
        assert!(Cli::try_parse_from(["sqlbench", "--engine", "oracle"]).is_err());

        let zero = cli(&["--concurrency", "0"]);
        assert!(resolve(&zero, &FileConfig::default()).is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rows: 0\nmax_tps: 100").unwrap();

        let loaded = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.rows, Some(0));
        assert_eq!(loaded.max_tps, NonZeroU32::new(100));

        assert!(FileConfig::load(Some(Path::new("/nonexistent/sqlbench.yaml"))).is_err());
    }
}
