//! Liveness mark: when did we last successfully send anything to the proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic timestamp of the last successful outbound send.
///
/// Written by the writer cycle and the heartbeat watchdog (via the
/// transport), read by the watchdog's inactivity check. Stored as millis
/// since construction so updates are a single atomic store.
#[derive(Debug)]
pub struct LivenessMark {
    origin: Instant,
    last_sent_millis: AtomicU64,
}

impl LivenessMark {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_sent_millis: AtomicU64::new(0),
        }
    }

    /// Record a successful send at "now".
    pub fn mark(&self) {
        let millis = self.origin.elapsed().as_millis() as u64;
        self.last_sent_millis.store(millis, Ordering::Relaxed);
    }

    /// Time elapsed since the last successful send.
    pub fn elapsed(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        let last = self.last_sent_millis.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

impl Default for LivenessMark {
    fn default() -> Self {
        Self::new()
    }
}
