//! Slowly adapting per-client trust score.
//!
//! Scores live in `[0, 100]` and start at [`NEUTRAL_SCORE`]. An admitted
//! request nudges the score up by one; a denial knocks it down by five, so a
//! client that keeps hitting its limit loses budget far faster than it earns
//! it back.

use std::sync::Arc;
use std::time::Duration;

use crate::store::Store;

pub const NEUTRAL_SCORE: u8 = 50;
pub const MAX_SCORE: u8 = 100;
pub const ALLOW_REWARD: u8 = 1;
pub const DENY_PENALTY: u8 = 5;

#[derive(Debug, Clone)]
pub struct ReputationTracker {
    store: Arc<dyn Store<u8>>,
    retention: Duration,
}

impl ReputationTracker {
    /// `retention` is how long an untouched score survives.
    pub fn new(store: Arc<dyn Store<u8>>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Current score, [`NEUTRAL_SCORE`] for unseen clients.
    pub fn score(&self, key: &str, now: u64) -> u8 {
        self.store.get(key, now).unwrap_or(NEUTRAL_SCORE).min(MAX_SCORE)
    }

    /// Apply one completed decision and return the new score.
    pub fn record(&self, key: &str, allowed: bool, now: u64) -> u8 {
        let current = self.score(key, now);
        let next = if allowed {
            current.saturating_add(ALLOW_REWARD).min(MAX_SCORE)
        } else {
            current.saturating_sub(DENY_PENALTY)
        };
        self.store.put(key, next, self.retention, now);
        next
    }

    /// Overwrite the score (clamped to the valid range).
    pub fn set(&self, key: &str, score: u8, now: u64) {
        self.store.put(key, score.min(MAX_SCORE), self.retention, now);
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store<u8>> {
        &self.store
    }
}

/// Scale `base` by `score / 100`, never below one request.
pub fn effective_max(base: u32, score: u8) -> u32 {
    let scaled = u64::from(base) * u64::from(score.min(MAX_SCORE)) / u64::from(MAX_SCORE);
    u32::try_from(scaled).unwrap_or(base).max(1)
}
