use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::error::SyncError;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// Bounded retry of transient failures. Anything else is returned on the
/// first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            Backoff::new(Duration::ZERO, Duration::ZERO, false),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// A server-provided `Retry-After` wins over the computed delay, capped at
    /// the backoff maximum.
    pub fn delay_for(&self, attempt: u32, err: &SyncError) -> Duration {
        match err.retry_after_secs() {
            Some(seconds) => Duration::from_secs(seconds).min(self.backoff.max()),
            None => self.backoff.delay(attempt),
        }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt.saturating_add(1) < self.max_attempts => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(
                        op = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            4,
            Backoff::new(Duration::from_millis(250), Duration::from_secs(10), true),
        )
    }
}
