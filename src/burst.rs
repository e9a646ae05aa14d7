//! Short-horizon burst detection.
//!
//! A client can sit comfortably inside its per-minute budget and still fire
//! a damaging spike within a few seconds. The burst detector runs the same
//! sliding-window count over a separate store with a much shorter horizon.

use std::sync::Arc;
use std::time::Duration;

use crate::store::Store;
use crate::window::{SlidingWindow, TimestampLog, WindowOutcome};

/// Default burst horizon.
pub const DEFAULT_BURST_WINDOW: Duration = Duration::from_secs(10);

/// Outcome of a burst check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstOutcome {
    /// Under the burst cap; the request has been recorded.
    Clear,
    /// At or over the cap.
    Tripped {
        /// When the oldest burst entry leaves the horizon.
        reset_at: u64,
    },
}

#[derive(Debug, Clone)]
pub struct BurstDetector {
    window: SlidingWindow,
    horizon: Duration,
}

impl BurstDetector {
    pub fn new(store: Arc<dyn Store<TimestampLog>>, horizon: Duration) -> Self {
        Self { window: SlidingWindow::new(store), horizon }
    }

    /// Check and record one request for `key` against `burst_limit`.
    pub fn check(&self, key: &str, burst_limit: u32, now: u64) -> BurstOutcome {
        match self.window.check(key, burst_limit, self.horizon, now) {
            WindowOutcome::Allowed { .. } => BurstOutcome::Clear,
            WindowOutcome::Denied { reset_at } => BurstOutcome::Tripped { reset_at },
        }
    }

    /// Requests currently inside the horizon for `key`.
    pub fn count(&self, key: &str, now: u64) -> usize {
        self.window.count(key, self.horizon, now)
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store<TimestampLog>> {
        self.window.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn trips_on_fourth_request_within_two_seconds() {
        let burst = BurstDetector::new(Arc::new(InMemoryStore::new(8)), DEFAULT_BURST_WINDOW);
        let t0 = 50_000;
        assert_eq!(burst.check("c", 3, t0), BurstOutcome::Clear);
        assert_eq!(burst.check("c", 3, t0 + 500), BurstOutcome::Clear);
        assert_eq!(burst.check("c", 3, t0 + 1_000), BurstOutcome::Clear);
        assert_eq!(burst.check("c", 3, t0 + 1_900), BurstOutcome::Tripped { reset_at: t0 + 10_000 });
    }

    #[test]
    fn clears_once_the_horizon_passes() {
        let burst = BurstDetector::new(Arc::new(InMemoryStore::new(8)), Duration::from_secs(10));
        for i in 0..2 {
            assert_eq!(burst.check("c", 2, 20_000 + i), BurstOutcome::Clear);
        }
        assert!(matches!(burst.check("c", 2, 20_010), BurstOutcome::Tripped { .. }));
        assert_eq!(burst.check("c", 2, 30_001), BurstOutcome::Clear);
        assert_eq!(burst.count("c", 30_001), 1);
    }
}
