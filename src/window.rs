//! Sliding-window counting over per-key timestamp logs.
//!
//! A log holds the millisecond timestamps of recently admitted requests. Each
//! check first drops entries that fell out of the window `(now - window, now]`,
//! so budgets free up continuously instead of at bucket boundaries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::millis;
use crate::store::Store;

/// Ordered admission timestamps (epoch millis) for one key.
pub type TimestampLog = VecDeque<u64>;

/// Result of a sliding-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The request fits; it has been recorded.
    Allowed {
        /// Budget left after recording this request.
        remaining: u32,
        /// When the oldest recorded request leaves the window.
        reset_at: u64,
    },
    /// The window is full; nothing was recorded.
    Denied {
        /// When the oldest recorded request leaves the window.
        reset_at: u64,
    },
}

impl WindowOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, WindowOutcome::Allowed { .. })
    }

    pub fn reset_at(&self) -> u64 {
        match self {
            WindowOutcome::Allowed { reset_at, .. } | WindowOutcome::Denied { reset_at } => *reset_at,
        }
    }
}

/// Sliding-window limiter backed by a [`Store`] of timestamp logs.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    store: Arc<dyn Store<TimestampLog>>,
}

impl SlidingWindow {
    pub fn new(store: Arc<dyn Store<TimestampLog>>) -> Self {
        Self { store }
    }

    /// Admit or deny one request for `key` against `limit` per `window`.
    ///
    /// Denied attempts are not appended, so a log never grows past `limit`
    /// while the client keeps hammering a full window.
    pub fn check(&self, key: &str, limit: u32, window: Duration, now: u64) -> WindowOutcome {
        let window_ms = millis(window);
        let mut log = self.store.get(key, now).unwrap_or_default();
        purge(&mut log, now, window_ms);

        if log.len() >= limit as usize {
            let oldest = log.front().copied().unwrap_or(now);
            return WindowOutcome::Denied { reset_at: oldest.saturating_add(window_ms) };
        }

        log.push_back(now);
        let remaining = limit.saturating_sub(log.len() as u32);
        let oldest = log.front().copied().unwrap_or(now);
        self.store.put(key, log, window, now);
        WindowOutcome::Allowed { remaining, reset_at: oldest.saturating_add(window_ms) }
    }

    /// Requests currently counted for `key`, without recording anything.
    pub fn count(&self, key: &str, window: Duration, now: u64) -> usize {
        let mut log = self.store.get(key, now).unwrap_or_default();
        purge(&mut log, now, millis(window));
        log.len()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Store<TimestampLog>> {
        &self.store
    }
}

fn purge(log: &mut TimestampLog, now: u64, window_ms: u64) {
    let Some(cutoff) = now.checked_sub(window_ms) else {
        return;
    };
    while log.front().is_some_and(|&ts| ts <= cutoff) {
        log.pop_front();
    }
}
