//! Single-slot expiry timer.
//!
//! Holds at most one pending deadline. Arming again replaces the previous
//! deadline instead of adding a second one, so a stream of messages keeps
//! pushing expiry further out.

use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep_until};

#[derive(Default)]
pub struct ExpiryTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ExpiryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule expiry `after` from now, replacing any pending deadline.
    pub fn arm(&mut self, after: Duration) {
        let deadline = Instant::now() + after;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
    }

    /// Drop the pending deadline. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|s| s.deadline())
    }

    /// Resolves when the pending deadline passes, then disarms the timer.
    ///
    /// Never resolves while disarmed. Cancel safe: dropping the future
    /// leaves the deadline in place.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let mut timer = ExpiryTimer::new();
        let start = Instant::now();
        timer.arm(Duration::from_secs(10));
        assert!(timer.is_armed());

        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut timer = ExpiryTimer::new();
        let start = Instant::now();
        timer.arm(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(5)).await;
        timer.arm(Duration::from_secs(10));
        assert_eq!(timer.deadline(), Some(start + Duration::from_secs(15)));

        timer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let mut timer = ExpiryTimer::new();
        assert!(timeout(Duration::from_secs(3600), timer.fired()).await.is_err());

        timer.arm(Duration::from_secs(1));
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(timeout(Duration::from_secs(3600), timer.fired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_keeps_deadline() {
        let mut timer = ExpiryTimer::new();
        timer.arm(Duration::from_secs(10));
        assert!(timeout(Duration::from_secs(4), timer.fired()).await.is_err());
        assert!(timer.is_armed());
        timer.fired().await;
        assert!(!timer.is_armed());
    }
}
