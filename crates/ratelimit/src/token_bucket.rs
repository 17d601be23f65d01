use std::time::Duration;
use tokio::time::Instant;

/// Continuously refilling token bucket
///
/// Holds `capacity` tokens and refills the whole capacity over `window`.
/// Uses tokio's clock so paused-time tests drive refills deterministically.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    tokens: f64,
    capacity: f64,
    window: Duration,
    refill_rate: f64, // tokens per second
    last_update: Instant,
}

impl TokenBucket {
    pub(crate) fn new(capacity: u32, window: Duration, available: u32) -> Self {
        let mut bucket = TokenBucket {
            tokens: available.min(capacity) as f64,
            capacity: capacity as f64,
            window,
            refill_rate: 0.0,
            last_update: Instant::now(),
        };
        bucket.refill_rate = Self::rate(capacity, window);
        bucket
    }

    fn rate(capacity: u32, window: Duration) -> f64 {
        let secs = window.as_secs_f64();
        if secs > 0.0 {
            capacity as f64 / secs
        } else {
            f64::INFINITY
        }
    }

    /// Take one token, or report how long until one is available.
    pub(crate) fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.refill_rate <= 0.0 {
            // Zero capacity never refills; poll again after a full window
            Err(self.window.max(Duration::from_millis(1)))
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_seconds = deficit / self.refill_rate;
            Err(Duration::from_secs_f64(wait_seconds).max(Duration::from_millis(1)))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update);
        if self.refill_rate.is_infinite() {
            self.tokens = self.capacity;
        } else {
            let new_tokens = elapsed.as_secs_f64() * self.refill_rate;
            self.tokens = (self.tokens + new_tokens).min(self.capacity);
        }
        self.last_update = now;
    }

    /// Replace capacity and window, keeping the tokens already available.
    pub(crate) fn reconfigure(&mut self, capacity: u32, window: Duration) {
        self.refill();
        self.capacity = capacity as f64;
        self.window = window;
        self.refill_rate = Self::rate(capacity, window);
        self.tokens = self.tokens.min(self.capacity);
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn available(&mut self) -> u32 {
        self.refill();
        self.tokens as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_until_empty() {
        let mut bucket = TokenBucket::new(2, Duration::from_secs(2), 2);

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());

        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_window() {
        let mut bucket = TokenBucket::new(4, Duration::from_secs(4), 0);
        assert!(bucket.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(bucket.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_clamps_tokens() {
        let mut bucket = TokenBucket::new(10, Duration::from_secs(1), 10);
        bucket.reconfigure(3, Duration::from_secs(6));

        assert_eq!(bucket.capacity(), 3);
        assert_eq!(bucket.window(), Duration::from_secs(6));
        assert_eq!(bucket.available(), 3);
    }
}
