use std::time::{Duration, Instant};
use tokio::time::sleep;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Token bucket pacing batch issue to a record rate.
///
/// Tokens are kept in micro-token units so refill stays integer-only.
pub struct RateLimiter {
    records_per_sec: u64,
    /// Burst allowance in records
    capacity: u64,
    /// Available tokens * MICROS_PER_SECOND
    tokens: u128,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(records_per_sec: u64) -> Self {
        Self::with_capacity(records_per_sec, records_per_sec)
    }

    pub fn with_capacity(records_per_sec: u64, capacity: u64) -> Self {
        Self {
            records_per_sec,
            capacity,
            tokens: (capacity as u128) * MICROS_PER_SECOND,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_micros = now.duration_since(self.last_refill).as_micros();
        if elapsed_micros == 0 {
            return;
        }

        let added = (self.records_per_sec as u128) * elapsed_micros;
        let max_tokens = (self.capacity as u128) * MICROS_PER_SECOND;
        self.tokens = self.tokens.saturating_add(added).min(max_tokens);
        self.last_refill = now;
    }

    /// Take `count` tokens if available.
    ///
    /// A request larger than the bucket is granted once the bucket is full,
    /// otherwise a batch bigger than one second of traffic would never pass.
    pub fn try_acquire(&mut self, count: u64) -> bool {
        self.refill();

        let required = (count.min(self.capacity.max(1)) as u128) * MICROS_PER_SECOND;
        if self.tokens >= required {
            self.tokens -= required;
            true
        } else {
            false
        }
    }

    /// Wait until `count` tokens are available and take them.
    pub async fn acquire(&mut self, count: u64) {
        loop {
            if self.try_acquire(count) {
                return;
            }

            if self.records_per_sec == 0 {
                sleep(Duration::from_secs(1)).await;
                continue;
            }

            let required = (count.min(self.capacity.max(1)) as u128) * MICROS_PER_SECOND;
            let deficit = required.saturating_sub(self.tokens);
            let wait_micros = (deficit / self.records_per_sec as u128).max(1);
            sleep(Duration::from_micros(wait_micros as u64)).await;
        }
    }
}
