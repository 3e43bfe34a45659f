use crate::constants::SPARKLINE_BINS;
use serde::Serialize;
use serde_with::{serde_as, DurationNanoSeconds};
use std::fmt;
use std::time::Duration;

const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Latency samples kept in ascending order.
///
/// Percentiles and the sparkline are both derived from this one sorted set so the two views can
/// never disagree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedLatencies(Vec<Duration>);

impl SortedLatencies {
    pub fn new(mut samples: Vec<Duration>) -> Self {
        samples.sort_unstable();
        Self(samples)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Nearest-rank quantile: the sample at `floor((n - 1) * q)`. Zero for an empty set.
    pub fn quantile(&self, q: f64) -> Duration {
        let Some(last) = self.0.len().checked_sub(1) else {
            return Duration::ZERO;
        };

        if q <= 0. {
            return self.0[0];
        }
        if q >= 1. {
            return self.0[last];
        }

        let idx = (last as f64 * q) as usize;
        self.0[idx.min(last)]
    }

    /// Log-scaled density of the samples between P1 and P99.
    pub fn sparkline(&self, bins: usize) -> Option<Sparkline> {
        if self.0.is_empty() || bins == 0 {
            return None;
        }

        // NOTE: The log transform is undefined at zero; clamping keeps the set sorted.
        let clamp = |d: Duration| d.max(Duration::from_nanos(1));
        let min = clamp(self.0[0]);
        let max = clamp(self.0[self.0.len() - 1]);

        let lo = clamp(self.quantile(0.01));
        let hi = clamp(self.quantile(0.99));
        if hi <= lo {
            return Some(Sparkline {
                min,
                max,
                glyphs: GLYPHS[GLYPHS.len() - 1].to_string().repeat(bins),
            });
        }

        let ln = |d: Duration| (d.as_nanos() as f64).ln();
        let (lmin, lmax) = (ln(lo), ln(hi));

        let mut counts = vec![0usize; bins];
        for d in &self.0 {
            let x = ln(clamp(*d)).clamp(lmin, lmax);
            let ratio = (x - lmin) / (lmax - lmin);
            let idx = (ratio * (bins - 1) as f64) as usize;
            counts[idx.min(bins - 1)] += 1;
        }

        let busiest = counts.iter().copied().max().unwrap_or(0);
        if busiest == 0 {
            return None;
        }

        let top = (GLYPHS.len() - 1) as f64;
        let glyphs = counts
            .iter()
            .map(|c| {
                let level = ((*c as f64 / busiest as f64) * top).round() as usize;
                GLYPHS[level.min(GLYPHS.len() - 1)]
            })
            .collect();

        Some(Sparkline { min, max, glyphs })
    }
}

/// Fixed-width glyph rendering of a latency distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sparkline {
    pub min: Duration,
    pub max: Duration,
    pub glyphs: String,
}

impl fmt::Display for Sparkline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glyphs)
    }
}

/// Finalized result of one measured workload pass.
///
/// Only constructed once every sample has been collected, and never mutated afterwards.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    workload: String,
    concurrency: usize,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    duration: Duration,
    ops: u64,
    errors: u64,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    p50: Duration,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    p95: Duration,
    #[serde_as(as = "DurationNanoSeconds<u64>")]
    p99: Duration,
    #[serde(skip)]
    samples: SortedLatencies,
}

impl Measurement {
    pub fn finalize(
        workload: impl Into<String>,
        concurrency: usize,
        duration: Duration,
        errors: u64,
        samples: Vec<Duration>,
    ) -> Self {
        let samples = SortedLatencies::new(samples);
        Self {
            workload: workload.into(),
            concurrency,
            duration,
            ops: samples.len() as u64,
            errors,
            p50: samples.quantile(0.50),
            p95: samples.quantile(0.95),
            p99: samples.quantile(0.99),
            samples,
        }
    }

    /// A measurement for a pass that never issued an operation.
    pub fn idle(workload: impl Into<String>, concurrency: usize, duration: Duration) -> Self {
        Self::finalize(workload, concurrency, duration, 0, Vec::new())
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Nominal length of the measured pass.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn ops(&self) -> u64 {
        self.ops
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn p50(&self) -> Duration {
        self.p50
    }

    pub fn p95(&self) -> Duration {
        self.p95
    }

    pub fn p99(&self) -> Duration {
        self.p99
    }

    pub fn ops_per_sec(&self) -> f64 {
        if self.duration.is_zero() {
            0.
        } else {
            self.ops as f64 / self.duration.as_secs_f64()
        }
    }

    /// Failed operations as a fraction of all attempted operations.
    pub fn error_rate(&self) -> f64 {
        let total = self.ops + self.errors;
        if total == 0 {
            0.
        } else {
            self.errors as f64 / total as f64
        }
    }

    pub fn sparkline(&self) -> Option<Sparkline> {
        self.samples.sparkline(SPARKLINE_BINS)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
