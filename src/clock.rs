//! Time source abstraction
//!
//! Polling, backoff and deadlines all go through [`Clock`] so tests can run
//! arbitrary schedules without real delays.

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Trait for reading time and suspending on it
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
