use async_channel::{Receiver, Sender};
use sqlbench_core::{Measurement, LATENCY_CHANNEL_CAPACITY};
use std::future::Future;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Single consumer for the latency samples of one workload pass.
///
/// Producers get a [`Recorder`]. The aggregator can only be finalized once since
/// [`Aggregator::finalize`] consumes it, and the consumer task only finishes after every
/// recorder has been dropped, so all in-flight samples are drained before statistics run.
pub struct Aggregator {
    workload: &'static str,
    concurrency: usize,
    duration: Duration,
    intake: Sender<Duration>,
    errors: Arc<AtomicU64>,
    consumer: JoinHandle<Vec<Duration>>,
}

impl Aggregator {
    pub fn new(workload: &'static str, concurrency: usize, duration: Duration) -> Self {
        let (intake, outlet) = async_channel::bounded(LATENCY_CHANNEL_CAPACITY);
        Self {
            workload,
            concurrency,
            duration,
            intake,
            errors: Arc::new(AtomicU64::new(0)),
            consumer: tokio::spawn(drain(outlet)),
        }
    }

    pub fn recorder(&self) -> Recorder {
        Recorder {
            intake: self.intake.clone(),
            errors: self.errors.clone(),
            workload: self.workload,
        }
    }

    /// Closes the intake, waits for the buffered samples and computes the final statistics.
    ///
    /// Every recorder must be dropped first, otherwise this waits for them.
    pub async fn finalize(self) -> Measurement {
        let Self {
            workload,
            concurrency,
            duration,
            intake,
            errors,
            consumer,
        } = self;
        drop(intake);

        let samples = match consumer.await {
            Ok(samples) => samples,
            Err(e) => {
                error!("Latency consumer for {workload} failed: {e}");
                vec![]
            }
        };
        let errors = errors.load(Ordering::Relaxed);
        trace!("{workload}: {} samples, {errors} errors", samples.len());

        Measurement::finalize(workload, concurrency, duration, errors, samples)
    }
}

async fn drain(outlet: Receiver<Duration>) -> Vec<Duration> {
    let mut samples = Vec::new();
    // NOTE: recv only fails once every sender is gone and the buffer is empty.
    while let Ok(latency) = outlet.recv().await {
        samples.push(latency);
    }
    samples
}

/// Producer handle held by each worker.
#[derive(Clone)]
pub struct Recorder {
    intake: Sender<Duration>,
    errors: Arc<AtomicU64>,
    workload: &'static str,
}

impl Recorder {
    /// Times one operation: a latency sample on `Ok`, an error tally on `Err`.
    pub async fn observe<T, R, E>(&self, op: T) -> Result<R, E>
    where
        T: Future<Output = Result<R, E>>,
    {
        let start = Instant::now();
        let res = op.await;
        let elapsed = start.elapsed();

        #[cfg(feature = "metrics")]
        metrics::histogram!("sqlbench_latency", "workload" => self.workload)
            .record(elapsed.as_nanos() as f64);

        match &res {
            Ok(_) => self.sample(elapsed).await,
            Err(_) => self.error(),
        }
        res
    }

    pub async fn sample(&self, latency: Duration) {
        #[cfg(feature = "metrics")]
        metrics::counter!("sqlbench_success", "workload" => self.workload).increment(1);

        if self.intake.send(latency).await.is_err() {
            error!("Latency intake for {} closed early", self.workload);
        }
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!("sqlbench_error", "workload" => self.workload).increment(1);
    }
}
