//! Backoff + jitter for transient HTTP failures.
//!
//! The HTTP client is the sole owner of retry: every request made through
//! `http_client::HttpCouchClient` passes through `with_retry`, and nothing
//! above it (spooler, orchestrators) ever sees a transient failure as an
//! error — it either eventually succeeds or surfaces as a terminal
//! `CouchError`.

use std::time::Duration;

use rand::Rng;

use crate::error::CouchError;

#[derive(Debug, Clone, Copy)]
pub enum JitterMode {
    None,
    Full,
    Equal,
    Decorrelated,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            jitter: JitterMode::Full,
        }
    }
}

impl RetryConfig {
    /// `attempt` is 0-based (0 == first retry after the initial failure).
    pub fn next_backoff(&self, attempt: u32, previous: Duration) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let capped = Duration::from_millis(exp).min(self.max_delay);
        apply_jitter(capped, previous, self.jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Applies the configured jitter strategy to a computed backoff ceiling.
pub fn apply_jitter(ceiling: Duration, previous: Duration, mode: JitterMode) -> Duration {
    let mut rng = rand::thread_rng();
    match mode {
        JitterMode::None => ceiling,
        JitterMode::Full => Duration::from_millis(rng.gen_range(0..=ceiling.as_millis() as u64)),
        JitterMode::Equal => {
            let half = ceiling.as_millis() as u64 / 2;
            Duration::from_millis(half + rng.gen_range(0..=half.max(1)))
        }
        JitterMode::Decorrelated => {
            let lo = previous.as_millis() as u64;
            let hi = (lo * 3).max(ceiling.as_millis() as u64).max(1);
            Duration::from_millis(rng.gen_range(lo.min(hi)..=hi))
        }
    }
}

/// Runs `op` up to `config.max_retries` extra times, classifying each
/// failure with `classify`. `classify` returns `Ok(None)` for a success
/// already embedded in `T` (the caller decides what counts as retryable —
/// e.g. an HTTP 503 body), `Ok(Some(()))` meaning "retry", or an `Err` to
/// stop immediately with a terminal error.
pub async fn with_retry<T, F, Fut, C>(
    config: &RetryConfig,
    mut op: F,
    mut classify: C,
) -> Result<T, CouchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CouchError>>,
    C: FnMut(&CouchError) -> bool,
{
    let mut attempt = 0;
    let mut delay = Duration::ZERO;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classify(&err) && config.should_retry(attempt) {
                    delay = config.next_backoff(attempt, delay);
                    tracing::debug!(attempt, ?delay, %err, "transient failure, retrying");
                    // it's not giving up, it's "strategically pausing"
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}
