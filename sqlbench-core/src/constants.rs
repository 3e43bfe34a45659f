use std::time::Duration;

/// Default number of keys captured by the keyspace snapshot.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 2048;

/// Default row cap for a single range-select.
pub const DEFAULT_RANGE_LIMIT: usize = 100;

/// Default warmup pass length.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5);

/// Default measured pass length.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(20);

/// Default dataset size seeded before the workloads run.
pub const DEFAULT_ROWS: usize = 10_000;

/// Size of the random payload written by the data loader.
pub const SEED_VALUE_SIZE: usize = 64;

/// Payload written by the insert workload.
pub const INSERT_PAYLOAD: &[u8] = b"payload";

/// Payload written by the update workload.
pub const UPDATE_PAYLOAD: &[u8] = b"updated";

/// Buffered latency samples between the workers and the collector.
pub const LATENCY_CHANNEL_CAPACITY: usize = 1 << 16;

/// Width of the rendered latency sparkline.
pub const SPARKLINE_BINS: usize = 14;

/// Rows per transaction while seeding.
pub const SEED_BATCH: usize = 1_000;
