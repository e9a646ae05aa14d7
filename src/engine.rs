//! The decision engine: one verdict per inbound request.
//!
//! Checks run in a fixed order and each may short-circuit:
//!
//! 1. deny list
//! 2. allow list
//! 3. suspicious-activity hard block
//! 4. burst cap
//! 5. reputation-adjusted sliding window
//! 6. reputation update from step 5
//!
//! Steps 3–6 run while holding the client's lock shard, so two concurrent
//! requests from one client cannot both read the same pre-update state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::adaptive::DynamicConfig;
use crate::admin::AdminHandle;
use crate::burst::{BurstDetector, BurstOutcome};
use crate::classifier::{Classification, SuspicionClassifier, SuspiciousActivity};
use crate::clock::{millis, Clock, SystemClock};
use crate::config::{AdmissionConfig, AdmissionSettings};
use crate::error::ConfigError;
use crate::identity::{ClientIdentity, ClientResolver, RequestDescriptor};
use crate::reputation::{effective_max, ReputationTracker};
use crate::store::{InMemoryStore, KeyLocks, Store};
use crate::verdict::{DenyReason, Verdict};
use crate::window::{SlidingWindow, TimestampLog, WindowOutcome};

/// A verdict together with who it was for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub client: ClientIdentity,
    pub route: String,
    pub verdict: Verdict,
    /// Clock reading the verdict was computed at.
    pub evaluated_at: u64,
}

/// Per-process admission controller.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct AdmissionControl {
    settings: DynamicConfig<AdmissionSettings>,
    resolver: ClientResolver,
    classifier: SuspicionClassifier,
    burst: BurstDetector,
    window: SlidingWindow,
    reputation: ReputationTracker,
    locks: KeyLocks,
    clock: Arc<dyn Clock>,
}

impl AdmissionControl {
    /// Engine with in-memory stores and the system clock.
    pub fn new(config: &AdmissionConfig) -> Result<Self, ConfigError> {
        Self::builder(config.clone()).build()
    }

    pub fn builder(config: AdmissionConfig) -> AdmissionControlBuilder {
        AdmissionControlBuilder {
            config,
            clock: None,
            window_store: None,
            burst_store: None,
            suspicion_store: None,
            reputation_store: None,
        }
    }

    /// Admission check for one request.
    pub fn check(&self, req: &RequestDescriptor) -> Verdict {
        self.evaluate(req).verdict
    }

    /// Admission check returning the resolved client as well.
    pub fn evaluate(&self, req: &RequestDescriptor) -> Admission {
        let now = self.clock.now_millis();
        let settings = self.settings.get();
        let client = self.resolver.resolve(req);
        let route = req.route_pattern().to_string();
        let verdict = self.decide(&settings, &client, req, &route, now);
        Admission { client, route, verdict, evaluated_at: now }
    }

    fn decide(
        &self,
        settings: &AdmissionSettings,
        client: &ClientIdentity,
        req: &RequestDescriptor,
        route: &str,
        now: u64,
    ) -> Verdict {
        let policy = *settings.policies.lookup(route);
        let key = client.key.as_str();

        if let Some(ip) = client.ip {
            if settings.blacklist.contains(&ip) {
                debug!(target: "turnstile::engine", client = %client.key, route, "blacklisted client denied");
                let reset_at = now.saturating_add(millis(settings.blacklist_reset));
                let mut verdict = Verdict::deny(DenyReason::Blacklisted, policy.max_requests(), reset_at);
                verdict.is_blacklisted = true;
                return verdict;
            }
            if settings.whitelist.contains(&ip) {
                trace!(target: "turnstile::engine", client = %client.key, route, "whitelisted client admitted");
                let mut verdict = Verdict::allow(u32::MAX, u32::MAX, now);
                verdict.is_whitelisted = true;
                return verdict;
            }
        }

        let _guard = self.locks.lock(key);

        let limit = if policy.is_reputation_weighted() {
            effective_max(policy.max_requests(), self.reputation.score(key, now))
        } else {
            policy.max_requests()
        };

        match self.classifier.classify(key, req.user_agent(), req.path(), now) {
            Classification::Blocked { reset_at, newly_blocked } => {
                if newly_blocked {
                    warn!(
                        target: "turnstile::engine",
                        client = %client.key,
                        route,
                        path = req.path(),
                        reset_at,
                        "client hard-blocked for suspicious activity"
                    );
                } else {
                    debug!(target: "turnstile::engine", client = %client.key, route, "hard block in effect");
                }
                return Verdict::deny(DenyReason::SuspiciousActivity, limit, reset_at);
            }
            Classification::Clear { signals, consecutive_failures } if !signals.is_empty() => {
                debug!(
                    target: "turnstile::engine",
                    client = %client.key,
                    signals = ?signals,
                    consecutive_failures,
                    "suspicious signals recorded"
                );
            }
            Classification::Clear { .. } => {}
        }

        let scoped = scoped_key(key, route);
        if let Some(burst_limit) = settings.burst_limit_for(&policy) {
            if let BurstOutcome::Tripped { reset_at } = self.burst.check(&scoped, burst_limit, now) {
                info!(target: "turnstile::engine", client = %client.key, route, burst_limit, "burst limit exceeded");
                return Verdict::deny(DenyReason::BurstLimitExceeded, limit, reset_at);
            }
        }

        let outcome = self.window.check(&scoped, limit, policy.window(), now);
        let score = self.reputation.record(key, outcome.is_allowed(), now);
        match outcome {
            WindowOutcome::Allowed { remaining, reset_at } => {
                trace!(target: "turnstile::engine", client = %client.key, route, remaining, score, "admitted");
                Verdict::allow(limit, remaining, reset_at)
            }
            WindowOutcome::Denied { reset_at } => {
                info!(target: "turnstile::engine", client = %client.key, route, limit, score, "rate limit exceeded");
                Verdict::deny(DenyReason::RateLimitExceeded, limit, reset_at)
            }
        }
    }

    /// Replace policies and allow/deny lists. Per-client state is kept.
    pub fn reload(&self, config: &AdmissionConfig) -> Result<(), ConfigError> {
        let settings = config.compile()?;
        info!(
            target: "turnstile::engine",
            policies = settings.policies.len(),
            blacklist = settings.blacklist.len(),
            whitelist = settings.whitelist.len(),
            "admission settings reloaded"
        );
        self.settings.set(settings);
        Ok(())
    }

    /// Drop every expired record from every store.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let purged = self.window.store().purge_expired(now)
            + self.burst.store().purge_expired(now)
            + self.classifier.store().purge_expired(now)
            + self.reputation.store().purge_expired(now);
        if purged > 0 {
            debug!(target: "turnstile::engine", purged, "expired client records purged");
        }
        purged
    }

    /// Periodically purge expired records on the current tokio runtime.
    ///
    /// Stores already expire lazily, so this only returns memory sooner.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let control = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                control.purge_expired();
            }
        })
    }

    /// Operator handle sharing this engine's state.
    pub fn admin(self: &Arc<Self>) -> AdminHandle {
        AdminHandle::new(Arc::clone(self))
    }

    /// Current clock reading.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn settings(&self) -> &DynamicConfig<AdmissionSettings> {
        &self.settings
    }

    pub(crate) fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub(crate) fn burst(&self) -> &BurstDetector {
        &self.burst
    }

    pub(crate) fn classifier(&self) -> &SuspicionClassifier {
        &self.classifier
    }

    pub(crate) fn reputation(&self) -> &ReputationTracker {
        &self.reputation
    }

    pub(crate) fn locks(&self) -> &KeyLocks {
        &self.locks
    }
}

/// Key of a client's window and burst logs for one route.
pub(crate) fn scoped_key(client: &str, route: &str) -> String {
    format!("{client}|{route}")
}

/// Builds an [`AdmissionControl`], optionally with custom stores or clock.
pub struct AdmissionControlBuilder {
    config: AdmissionConfig,
    clock: Option<Arc<dyn Clock>>,
    window_store: Option<Arc<dyn Store<TimestampLog>>>,
    burst_store: Option<Arc<dyn Store<TimestampLog>>>,
    suspicion_store: Option<Arc<dyn Store<SuspiciousActivity>>>,
    reputation_store: Option<Arc<dyn Store<u8>>>,
}

impl AdmissionControlBuilder {
    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn window_store(mut self, store: Arc<dyn Store<TimestampLog>>) -> Self {
        self.window_store = Some(store);
        self
    }

    pub fn burst_store(mut self, store: Arc<dyn Store<TimestampLog>>) -> Self {
        self.burst_store = Some(store);
        self
    }

    pub fn suspicion_store(mut self, store: Arc<dyn Store<SuspiciousActivity>>) -> Self {
        self.suspicion_store = Some(store);
        self
    }

    pub fn reputation_store(mut self, store: Arc<dyn Store<u8>>) -> Self {
        self.reputation_store = Some(store);
        self
    }

    pub fn build(self) -> Result<AdmissionControl, ConfigError> {
        let settings = self.config.compile()?;
        let capacity = self.config.store.capacity;
        if capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "store.capacity",
                reason: "must be > 0".into(),
            });
        }
        let window_store = self.window_store.unwrap_or_else(|| Arc::new(InMemoryStore::new(capacity)));
        let burst_store = self.burst_store.unwrap_or_else(|| Arc::new(InMemoryStore::new(capacity)));
        let suspicion_store =
            self.suspicion_store.unwrap_or_else(|| Arc::new(InMemoryStore::new(capacity)));
        let reputation_store =
            self.reputation_store.unwrap_or_else(|| Arc::new(InMemoryStore::new(capacity)));

        Ok(AdmissionControl {
            settings: DynamicConfig::new(settings),
            resolver: ClientResolver::new(self.config.resolver),
            classifier: SuspicionClassifier::new(suspicion_store, &self.config.classifier),
            burst: BurstDetector::new(burst_store, self.config.burst_window()),
            window: SlidingWindow::new(window_store),
            reputation: ReputationTracker::new(reputation_store, self.config.store.retention()),
            locks: KeyLocks::new(self.config.store.lock_shards),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}
