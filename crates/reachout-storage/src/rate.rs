//! Per-source request budgets.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl TokenBucketConfig {
    /// `tokens` requests per minute, refilled one token at a time.
    pub fn per_minute(tokens: u32) -> Self {
        let tokens = tokens.max(1);
        Self {
            capacity: tokens,
            refill_every: Duration::from_secs(60) / tokens,
        }
    }
}

/// Makes callers wait for a token instead of rejecting them.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<Refill>,
}

#[derive(Debug)]
struct Refill {
    available: u32,
    since: Instant,
}

impl Refill {
    /// Credits whole refill periods elapsed since `since`.
    fn credit(&mut self, config: &TokenBucketConfig, now: Instant) {
        let periods = now.saturating_duration_since(self.since).as_nanos()
            / config.refill_every.as_nanos();
        if periods == 0 {
            return;
        }
        let periods = periods.min(u128::from(config.capacity)) as u32;
        self.available = (self.available + periods).min(config.capacity);
        self.since = if self.available == config.capacity {
            now
        } else {
            self.since + config.refill_every * periods
        };
    }
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        let config = TokenBucketConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            state: Mutex::new(Refill {
                available: config.capacity,
                since: Instant::now(),
            }),
            config,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }

    pub async fn take(&self) {
        if self.config.refill_every.is_zero() {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.credit(&self.config, now);
                if state.available > 0 {
                    state.available -= 1;
                    return;
                }
                self.config
                    .refill_every
                    .saturating_sub(now.saturating_duration_since(state.since))
            };
            debug!(wait_ms = wait.as_millis() as u64, "request budget spent; waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn per_minute_config_spreads_refills() {
        let rate = TokenBucketConfig::per_minute(5);
        assert_eq!(rate.capacity, 5);
        assert_eq!(rate.refill_every, Duration::from_secs(12));
        assert_eq!(TokenBucketConfig::per_minute(0).capacity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_makes_excess_requests_wait_instead_of_dropping() {
        let bucket = Arc::new(TokenBucket::new(TokenBucketConfig::per_minute(5)));
        let started = Instant::now();

        for _ in 0..5 {
            bucket.take().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        // two more than the budget: both complete, neither is rejected
        let mut handles = Vec::new();
        for _ in 0..2 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move { bucket.take().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_after_idle_period() {
        let bucket = TokenBucket::new(TokenBucketConfig {
            capacity: 2,
            refill_every: Duration::from_secs(10),
        });
        bucket.take().await;
        bucket.take().await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let before = Instant::now();
        bucket.take().await;
        bucket.take().await;
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
