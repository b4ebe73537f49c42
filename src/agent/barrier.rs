//! One-shot latch released on the first successful registration.
//!
//! Embedding code (and tests) block on `await_released` until the agent is
//! actually usable. Reconnects after the first registration never re-arm
//! or re-release the latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Single-fire barrier for the first successful registration.
#[derive(Debug)]
pub struct InitialConnectionBarrier {
    released_tx: watch::Sender<bool>,
    released: AtomicBool,
}

impl InitialConnectionBarrier {
    pub fn new() -> Self {
        let (released_tx, _) = watch::channel(false);
        Self {
            released_tx,
            released: AtomicBool::new(false),
        }
    }

    /// Release the barrier. Only the first call has any effect.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            let _ = self.released_tx.send(true);
        }
    }

    /// Whether the barrier has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Wait until the barrier is released or the timeout elapses.
    ///
    /// Returns true if released (including before the call), false on
    /// timeout.
    pub async fn await_released(&self, timeout: Duration) -> bool {
        if self.is_released() {
            return true;
        }
        let mut rx = self.released_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|released| *released))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }
}

impl Default for InitialConnectionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_await_times_out_before_release() {
        let barrier = InitialConnectionBarrier::new();
        assert!(!barrier.await_released(Duration::from_millis(20)).await);
        assert!(!barrier.is_released());
    }

    #[tokio::test]
    async fn test_await_returns_after_release() {
        let barrier = Arc::new(InitialConnectionBarrier::new());

        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.await_released(Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.release();

        assert!(waiter.await.unwrap());
        assert!(barrier.is_released());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let barrier = InitialConnectionBarrier::new();
        barrier.release();
        barrier.release();
        assert!(barrier.is_released());
        assert!(barrier.await_released(Duration::from_millis(1)).await);
    }
}
