//! Startup configuration for the admission layer.
//!
//! [`AdmissionConfig`] is the serialisable document (JSON, camelCase keys).
//! It is validated once and compiled into [`AdmissionSettings`], the form the
//! engine reads on every request. Settings can be swapped at runtime through
//! [`AdmissionControl::reload`](crate::engine::AdmissionControl::reload);
//! classifier, resolver and store sizing are fixed when the engine is built.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::burst::DEFAULT_BURST_WINDOW;
use crate::classifier::ClassifierConfig;
use crate::error::ConfigError;
use crate::identity::ResolverConfig;
use crate::policy::{Policy, PolicyRegistry};

/// How long a blacklisted client is told to wait.
pub const DEFAULT_BLACKLIST_RESET: Duration = Duration::from_secs(24 * 60 * 60);
/// How long an untouched reputation score survives.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
/// Keys per store before least-recently-used eviction.
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;
/// Per-client lock shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

/// Sizing and retention of the per-client stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Maximum keys held by each store.
    pub capacity: usize,
    /// Idle lifetime of reputation scores.
    pub retention_ms: u64,
    /// Number of per-client lock shards.
    pub lock_shards: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STORE_CAPACITY,
            retention_ms: crate::clock::millis(DEFAULT_RETENTION),
            lock_shards: DEFAULT_LOCK_SHARDS,
        }
    }
}

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Full configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Policy for routes with no explicit entry.
    pub default_policy: Policy,
    /// Route pattern → policy. A trailing `*` makes a prefix pattern.
    pub policies: BTreeMap<String, Policy>,
    /// Addresses that are always denied.
    pub blacklist: Vec<String>,
    /// Addresses that are always admitted.
    pub whitelist: Vec<String>,
    /// Burst cap for policies that do not set their own.
    pub burst_limit: Option<u32>,
    /// Burst horizon.
    pub burst_window_ms: u64,
    /// Reset advertised to blacklisted clients.
    pub blacklist_reset_ms: u64,
    pub classifier: ClassifierConfig,
    pub resolver: ResolverConfig,
    pub store: StoreConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_policy: Policy::default(),
            policies: BTreeMap::new(),
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            burst_limit: None,
            burst_window_ms: crate::clock::millis(DEFAULT_BURST_WINDOW),
            blacklist_reset_ms: crate::clock::millis(DEFAULT_BLACKLIST_RESET),
            classifier: ClassifierConfig::default(),
            resolver: ResolverConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AdmissionConfig {
    pub fn builder() -> AdmissionConfigBuilder {
        AdmissionConfigBuilder::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw)
    }

    /// Check every value without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compile().map(|_| ())
    }

    /// Burst horizon as a duration.
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    /// Validate and produce the runtime form.
    pub fn compile(&self) -> Result<AdmissionSettings, ConfigError> {
        if self.burst_limit == Some(0) {
            return Err(ConfigError::ZeroBurstLimit { route: "global".into() });
        }
        if self.burst_window_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "burstWindowMs",
                reason: "must be > 0".into(),
            });
        }
        if self.store.retention_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "store.retentionMs",
                reason: "must be > 0".into(),
            });
        }
        self.classifier.validate()?;
        let policies = PolicyRegistry::new(
            self.policies.iter().map(|(route, policy)| (route.clone(), *policy)),
            self.default_policy,
        )?;
        Ok(AdmissionSettings {
            policies,
            blacklist: parse_list("blacklist", &self.blacklist)?,
            whitelist: parse_list("whitelist", &self.whitelist)?,
            burst_limit: self.burst_limit,
            blacklist_reset: Duration::from_millis(self.blacklist_reset_ms),
        })
    }
}

fn parse_list(list: &'static str, raw: &[String]) -> Result<HashSet<IpAddr>, ConfigError> {
    raw.iter()
        .map(|entry| {
            entry
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidAddress { list, value: entry.clone() })
        })
        .collect()
}

/// Validated, lookup-ready settings read on every admission check.
#[derive(Debug, Clone, Default)]
pub struct AdmissionSettings {
    pub policies: PolicyRegistry,
    pub blacklist: HashSet<IpAddr>,
    pub whitelist: HashSet<IpAddr>,
    pub burst_limit: Option<u32>,
    pub blacklist_reset: Duration,
}

impl AdmissionSettings {
    /// Burst cap for `policy`: its own, else the global one.
    pub fn burst_limit_for(&self, policy: &Policy) -> Option<u32> {
        policy.burst_limit().or(self.burst_limit)
    }
}

/// Fluent builder for [`AdmissionConfig`].
#[derive(Debug, Clone, Default)]
pub struct AdmissionConfigBuilder {
    config: AdmissionConfig,
}

impl AdmissionConfigBuilder {
    pub fn default_policy(mut self, policy: Policy) -> Self {
        self.config.default_policy = policy;
        self
    }

    pub fn policy(mut self, route: impl Into<String>, policy: Policy) -> Self {
        self.config.policies.insert(route.into(), policy);
        self
    }

    pub fn blacklist(mut self, ip: impl Into<String>) -> Self {
        self.config.blacklist.push(ip.into());
        self
    }

    pub fn whitelist(mut self, ip: impl Into<String>) -> Self {
        self.config.whitelist.push(ip.into());
        self
    }

    pub fn burst_limit(mut self, limit: u32) -> Self {
        self.config.burst_limit = Some(limit);
        self
    }

    pub fn burst_window(mut self, window: Duration) -> Self {
        self.config.burst_window_ms = crate::clock::millis(window);
        self
    }

    pub fn classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.config.classifier = classifier;
        self
    }

    pub fn resolver(mut self, resolver: ResolverConfig) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<AdmissionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
