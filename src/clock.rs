//! Time source for polling loops
//!
//! Every wait in a merge job goes through a [`Clock`], so tests can run the
//! 15-minute CI deadline in microseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Wall-clock reads plus a sleep primitive
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the current task for `duration`
    async fn sleep(&self, duration: Duration);

    /// Instant `timeout` from now; saturates instead of overflowing
    fn deadline(&self, timeout: Duration) -> DateTime<Utc> {
        let now = self.now();
        chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Production clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
