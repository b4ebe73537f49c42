//! Reconnect rate limiter.
//!
//! A one-token bucket refilling at one token per reconnect pause. The
//! bucket starts full, so the very first `acquire()` returns immediately
//! and every later one waits out the remainder of the pause. The pause
//! applies after clean disconnects too, to avoid hot-looping against a
//! proxy that is cycling connections quickly.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket with one token per period, primed at construction.
#[derive(Debug)]
pub struct ReconnectLimiter {
    period: Duration,
    next_token_at: Mutex<Instant>,
}

impl ReconnectLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            // First token is immediately available.
            next_token_at: Mutex::new(Instant::now()),
        }
    }

    /// Block until the next token is available; returns how long we waited.
    pub async fn acquire(&self) -> Duration {
        let mut next = self.next_token_at.lock().await;
        let now = Instant::now();
        let waited = if *next > now {
            let wait = *next - now;
            tokio::time::sleep(wait).await;
            wait
        } else {
            Duration::ZERO
        };
        // Next token becomes available one period after this grant.
        *next = next.max(now) + self.period;
        waited
    }
}
