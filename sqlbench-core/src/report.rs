//! Human readable rendering of a [`Measurement`].
use crate::stats::Measurement;
use std::fmt;
use std::time::Duration;

const INNER_WIDTH: usize = 70;

impl Measurement {
    /// Fixed-width report block, one per workload.
    pub fn pretty(&self) -> String {
        let header = format!(" {} ", self.workload().to_uppercase());
        let header_pad = INNER_WIDTH.saturating_sub(header.chars().count());

        let mut out = String::new();
        out.push('┌');
        out.push_str(&header);
        out.push_str(&"─".repeat(header_pad));
        out.push_str("┐\n");

        let duration = humantime::format_duration(self.duration()).to_string();
        line(
            &mut out,
            format!("Concurrency : {:<7}  Duration : {:<10}", self.concurrency(), duration),
        );
        line(
            &mut out,
            format!(
                "Ops         : {:<12} ({:.1} ops/s)",
                group_thousands(self.ops()),
                self.ops_per_sec(),
            ),
        );
        // Errors are a share of every attempt, failed ones included.
        line(
            &mut out,
            format!(
                "Errors      : {:<12} ({:.2}% of attempts)",
                group_thousands(self.errors()),
                self.error_rate() * 100.,
            ),
        );
        line(
            &mut out,
            format!(
                "Latency P50 : {:<8}  P95 : {:<8}  P99 : {:<8}",
                format_latency(self.p50()),
                format_latency(self.p95()),
                format_latency(self.p99()),
            ),
        );
        if let Some(spark) = self.sparkline() {
            line(
                &mut out,
                format!(
                    "Histogram   : {spark}  (min {}, max {})",
                    format_latency(spark.min),
                    format_latency(spark.max),
                ),
            );
        }

        out.push('└');
        out.push_str(&"─".repeat(INNER_WIDTH));
        out.push_str("┘\n");
        out
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

fn line(out: &mut String, mut content: String) {
    let width = content.chars().count();
    if width < INNER_WIDTH {
        content.push_str(&" ".repeat(INNER_WIDTH - width));
    }
    out.push('│');
    out.push_str(&content);
    out.push_str("│\n");
}

/// Compact latency formatting: `512ns`, `3.20µs`, `1.05ms`, `2.00s`.
pub fn format_latency(d: Duration) -> String {
    if d < Duration::from_micros(1) {
        format!("{}ns", d.as_nanos())
    } else if d < Duration::from_millis(1) {
        format!("{:.2}µs", d.as_nanos() as f64 / 1e3)
    } else if d < Duration::from_secs(1) {
        format!("{:.2}ms", d.as_nanos() as f64 / 1e6)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

/// `1234567` -> `1,234,567`
pub fn group_thousands(v: u64) -> String {
    let digits = v.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
