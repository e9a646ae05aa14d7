//! Route policies and the registry that resolves a route pattern to one.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Budget applied to one route pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    window_ms: u64,
    max_requests: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    burst_limit: Option<u32>,
    #[serde(default)]
    reputation_weighted: bool,
}

impl Policy {
    /// Policy admitting `max_requests` per sliding `window`.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window_ms: crate::clock::millis(window),
            max_requests,
            burst_limit: None,
            reputation_weighted: false,
        }
    }

    /// Also cap requests inside the short burst horizon.
    pub fn with_burst_limit(mut self, burst_limit: u32) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }

    /// Scale the budget by the client's reputation score.
    pub fn reputation_weighted(mut self) -> Self {
        self.reputation_weighted = true;
        self
    }

    /// Sliding window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Sliding window length in milliseconds.
    pub fn window_millis(&self) -> u64 {
        self.window_ms
    }

    /// Requests admitted per window before reputation scaling.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Per-policy burst cap, if any.
    pub fn burst_limit(&self) -> Option<u32> {
        self.burst_limit
    }

    /// Whether reputation scales this policy's budget.
    pub fn is_reputation_weighted(&self) -> bool {
        self.reputation_weighted
    }

    /// Reject zero windows, zero budgets and zero burst limits.
    pub fn validate(&self, route: &str) -> Result<(), ConfigError> {
        if self.window_ms == 0 {
            return Err(ConfigError::ZeroWindow { route: route.to_string() });
        }
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroMaxRequests { route: route.to_string() });
        }
        if self.burst_limit == Some(0) {
            return Err(ConfigError::ZeroBurstLimit { route: route.to_string() });
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 100)
    }
}

/// Immutable route-pattern → policy table with a default fallback.
///
/// Patterns ending in `*` match any route with that prefix; the longest such
/// prefix wins. Exact patterns always beat prefixes.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    exact: HashMap<String, Policy>,
    // sorted longest prefix first
    prefixes: Vec<(String, Policy)>,
    default: Policy,
}

impl PolicyRegistry {
    /// Build a validated registry.
    pub fn new<I, S>(policies: I, default: Policy) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, Policy)>,
        S: Into<String>,
    {
        default.validate("default")?;
        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();
        for (route, policy) in policies {
            let route = route.into();
            policy.validate(&route)?;
            match route.strip_suffix('*') {
                Some(prefix) => prefixes.push((prefix.to_string(), policy)),
                None => {
                    exact.insert(route, policy);
                }
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Ok(Self { exact, prefixes, default })
    }

    /// Policy for `route`, or the default.
    pub fn lookup(&self, route: &str) -> &Policy {
        if let Some(policy) = self.exact.get(route) {
            return policy;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| route.starts_with(prefix.as_str()))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.default)
    }

    /// The fallback policy.
    pub fn default_policy(&self) -> &Policy {
        &self.default
    }

    /// Number of explicitly configured patterns.
    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    /// True when only the default policy is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self { exact: HashMap::new(), prefixes: Vec::new(), default: Policy::default() }
    }
}
