//! Heuristic abuse classification with a temporary hard block.
//!
//! Every request is scored against three independent signals: an automation
//! user-agent, a probe of a sensitive path, and an abnormal request rate.
//! Each flagged request bumps the client's failure counter; once the counter
//! reaches the block threshold the client is refused outright until the block
//! duration has passed since its last flagged request. Below the threshold the
//! classifier only records evidence.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::millis;
use crate::error::ConfigError;
use crate::store::Store;

/// Distinct tags kept per client.
pub const MAX_PATTERN_TAGS: usize = 16;

const DEFAULT_BOT_AGENTS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "java/",
    "libwww",
    "httpclient",
    "postman",
    "insomnia",
    "headless",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "scrapy",
    "nikto",
    "sqlmap",
    "nmap",
    "masscan",
    "zgrab",
];

const DEFAULT_SENSITIVE_PATHS: &[&str] = &[
    "/.env",
    "/.git",
    "/wp-admin",
    "/wp-login",
    "/phpmyadmin",
    "/admin",
    "/config",
    "/.aws",
    "/.ssh",
    "/etc/passwd",
    "../",
    "..%2f",
    "%2e%2e",
];

/// Classifier thresholds and pattern lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Case-insensitive user-agent substrings flagged as automation.
    pub bot_user_agents: Vec<String>,
    /// Case-insensitive path substrings flagged as probing.
    pub sensitive_paths: Vec<String>,
    /// Request rate above which a client is flagged.
    pub max_requests_per_second: f64,
    /// Flagged requests before the hard block.
    pub block_threshold: u32,
    /// Length of the hard block.
    pub block_duration_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            bot_user_agents: DEFAULT_BOT_AGENTS.iter().map(|s| s.to_string()).collect(),
            sensitive_paths: DEFAULT_SENSITIVE_PATHS.iter().map(|s| s.to_string()).collect(),
            max_requests_per_second: 10.0,
            block_threshold: 5,
            block_duration_ms: 60 * 60 * 1000,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_threshold == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "classifier.blockThreshold",
                reason: "must be > 0".into(),
            });
        }
        if self.block_duration_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "classifier.blockDurationMs",
                reason: "must be > 0".into(),
            });
        }
        if !(self.max_requests_per_second.is_finite() && self.max_requests_per_second > 0.0) {
            return Err(ConfigError::InvalidSetting {
                field: "classifier.maxRequestsPerSecond",
                reason: format!("must be a positive number (got {})", self.max_requests_per_second),
            });
        }
        Ok(())
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }
}

/// One heuristic that fired for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    BotUserAgent,
    SensitivePath,
    AbnormalRate,
}

impl Signal {
    pub fn tag(self) -> &'static str {
        match self {
            Signal::BotUserAgent => "bot_user_agent",
            Signal::SensitivePath => "sensitive_path",
            Signal::AbnormalRate => "abnormal_rate",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Accumulated evidence for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousActivity {
    pub consecutive_failures: u32,
    pub last_failure_at: u64,
    pub total_requests: u64,
    pub patterns: Vec<String>,
}

impl SuspiciousActivity {
    fn fresh(now: u64) -> Self {
        Self { consecutive_failures: 0, last_failure_at: now, total_requests: 0, patterns: Vec::new() }
    }

    fn record_tag(&mut self, tag: &str) {
        if !self.patterns.iter().any(|p| p == tag) {
            if self.patterns.len() >= MAX_PATTERN_TAGS {
                self.patterns.remove(0);
            }
            self.patterns.push(tag.to_string());
        }
    }
}

/// What the classifier concluded for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not blocked. `signals` lists whatever fired on this request.
    Clear { signals: Vec<Signal>, consecutive_failures: u32 },
    /// Hard block in effect until `reset_at`.
    Blocked { reset_at: u64, newly_blocked: bool },
}

impl Classification {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Classification::Blocked { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SuspicionClassifier {
    store: Arc<dyn Store<SuspiciousActivity>>,
    bot_user_agents: Vec<String>,
    sensitive_paths: Vec<String>,
    max_requests_per_second: f64,
    block_threshold: u32,
    block_duration: Duration,
}

impl SuspicionClassifier {
    pub fn new(store: Arc<dyn Store<SuspiciousActivity>>, config: &ClassifierConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().filter(|s| !s.is_empty()).map(|s| s.to_ascii_lowercase()).collect()
        };
        Self {
            store,
            bot_user_agents: lower(&config.bot_user_agents),
            sensitive_paths: lower(&config.sensitive_paths),
            max_requests_per_second: config.max_requests_per_second,
            block_threshold: config.block_threshold,
            block_duration: config.block_duration(),
        }
    }

    /// Evaluate one request for `key` and update its record.
    pub fn classify(&self, key: &str, user_agent: &str, path: &str, now: u64) -> Classification {
        let block_ms = millis(self.block_duration);
        let mut record = self
            .store
            .get(key, now)
            .filter(|r| !self.block_elapsed(r, now, block_ms))
            .unwrap_or_else(|| SuspiciousActivity::fresh(now));

        if record.consecutive_failures >= self.block_threshold {
            return Classification::Blocked {
                reset_at: record.last_failure_at.saturating_add(block_ms),
                newly_blocked: false,
            };
        }

        record.total_requests = record.total_requests.saturating_add(1);
        let signals = self.signals(&record, user_agent, path, now);
        if !signals.is_empty() {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_failure_at = now;
            for signal in &signals {
                record.record_tag(signal.tag());
            }
        }

        let failures = record.consecutive_failures;
        self.store.put(key, record, self.block_duration, now);

        if failures >= self.block_threshold {
            Classification::Blocked { reset_at: now.saturating_add(block_ms), newly_blocked: true }
        } else {
            Classification::Clear { signals, consecutive_failures: failures }
        }
    }

    /// Signals for a request; `record.total_requests` must already count it.
    pub fn signals(
        &self,
        record: &SuspiciousActivity,
        user_agent: &str,
        path: &str,
        now: u64,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        let agent = user_agent.to_ascii_lowercase();
        if self.bot_user_agents.iter().any(|p| agent.contains(p.as_str())) {
            signals.push(Signal::BotUserAgent);
        }
        let path = path.to_ascii_lowercase();
        if self.sensitive_paths.iter().any(|p| path.contains(p.as_str())) {
            signals.push(Signal::SensitivePath);
        }
        // elapsed below one second counts as one second
        let elapsed_secs = now.saturating_sub(record.last_failure_at).max(1_000) as f64 / 1_000.0;
        if record.total_requests as f64 / elapsed_secs > self.max_requests_per_second {
            signals.push(Signal::AbnormalRate);
        }
        signals
    }

    /// Current record for `key`, if any.
    pub fn activity(&self, key: &str, now: u64) -> Option<SuspiciousActivity> {
        let block_ms = millis(self.block_duration);
        self.store.get(key, now).filter(|r| !self.block_elapsed(r, now, block_ms))
    }

    /// Whether `key` is currently hard-blocked.
    pub fn is_blocked(&self, key: &str, now: u64) -> bool {
        self.activity(key, now).is_some_and(|r| r.consecutive_failures >= self.block_threshold)
    }

    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store<SuspiciousActivity>> {
        &self.store
    }

    // A blocked record whose block has run out is treated as expired even if
    // the backing store keeps it around longer.
    fn block_elapsed(&self, record: &SuspiciousActivity, now: u64, block_ms: u64) -> bool {
        record.consecutive_failures >= self.block_threshold
            && now >= record.last_failure_at.saturating_add(block_ms)
    }
}
