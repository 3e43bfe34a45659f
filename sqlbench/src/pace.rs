//! Stop signal and optional rate limiting shared by the workers of one pass.
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Soft end of a pass: time-bounded and also cancelled along with its parent token.
#[derive(Clone, Debug)]
pub struct Deadline {
    token: CancellationToken,
    at: Instant,
}

impl Deadline {
    pub fn new(parent: &CancellationToken, duration: Duration) -> Self {
        Self {
            token: parent.child_token(),
            at: Instant::now() + duration,
        }
    }

    /// Non-blocking check made before every new operation.
    pub fn expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.at
    }

    pub async fn reached(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.at.into()) => {}
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Admission control for `max_tps`. Without a cap every request is admitted immediately.
#[derive(Clone, Default)]
pub struct Pacer {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl Pacer {
    /// `burst` is the largest single request, e.g. the insert batch size.
    pub fn new(max_tps: Option<NonZeroU32>, burst: usize) -> Self {
        let limiter = max_tps.map(|tps| {
            let burst = u32::try_from(burst)
                .ok()
                .and_then(NonZeroU32::new)
                .map_or(tps, |b| b.max(tps));
            Arc::new(RateLimiter::direct(
                Quota::per_second(tps).allow_burst(burst),
            ))
        });
        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Waits for `n` permits. Returns `false` if the deadline came first.
    pub async fn admit(&self, n: usize, deadline: &Deadline) -> bool {
        let Some(limiter) = &self.limiter else {
            return !deadline.expired();
        };
        let n = u32::try_from(n)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);

        tokio::select! {
            res = limiter.until_n_ready(n) => {
                if let Err(e) = res {
                    warn!("Rate limiter cannot admit {n} at once: {e}");
                }
                !deadline.expired()
            }
            _ = deadline.reached() => false,
        }
    }
}
