//! Verdicts and their mapping onto a `429 Too Many Requests` rejection.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// HTTP status conventionally used for a denied admission.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Closed set of reasons a request can be denied.
///
/// Serialises as the same string [`DenyReason::as_str`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    /// The client IP is on the deny list.
    #[serde(rename = "IP blacklisted")]
    Blacklisted,
    /// The suspicious-activity classifier imposed a hard block.
    #[serde(rename = "Suspicious activity detected")]
    SuspiciousActivity,
    /// Too many requests inside the burst horizon.
    #[serde(rename = "Burst limit exceeded")]
    BurstLimitExceeded,
    /// The sliding-window budget for the route is exhausted.
    #[serde(rename = "Rate limit exceeded")]
    RateLimitExceeded,
}

impl DenyReason {
    /// Human-readable reason as reported to callers.
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::Blacklisted => "IP blacklisted",
            DenyReason::SuspiciousActivity => "Suspicious activity detected",
            DenyReason::BurstLimitExceeded => "Burst limit exceeded",
            DenyReason::RateLimitExceeded => "Rate limit exceeded",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check. Produced fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Effective budget for the matched policy: its `max_requests`, or the
    /// reputation-scaled value for reputation-weighted policies.
    pub limit: u32,
    /// Budget left in the current window after this request.
    pub remaining: u32,
    /// Epoch millis at which the limiting condition clears.
    pub reset_at: u64,
    /// Populated on every deny.
    pub reason: Option<DenyReason>,
    /// Client IP is on the deny list.
    pub is_blacklisted: bool,
    /// Client IP is on the allow list.
    pub is_whitelisted: bool,
}

impl Verdict {
    pub(crate) fn allow(limit: u32, remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            reason: None,
            is_blacklisted: false,
            is_whitelisted: false,
        }
    }

    pub(crate) fn deny(reason: DenyReason, limit: u32, reset_at: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            reason: Some(reason),
            is_blacklisted: false,
            is_whitelisted: false,
        }
    }

    /// Seconds until `reset_at`, rounded up.
    pub fn retry_after_secs(&self, now_millis: u64) -> u64 {
        self.reset_at.saturating_sub(now_millis).div_ceil(1000)
    }

    /// Informational `X-RateLimit-*` headers for this verdict.
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.to_string()),
        ]
    }

    /// The 429 rejection for a deny, `None` when the request was allowed.
    pub fn rejection(&self, now_millis: u64) -> Option<Rejection> {
        let reason = self.reason.filter(|_| !self.allowed)?;
        Some(Rejection {
            status: TOO_MANY_REQUESTS,
            reason,
            limit: self.limit,
            reset_at: self.reset_at,
            retry_after_secs: self.retry_after_secs(now_millis),
        })
    }
}

/// Protocol-level rejection derived from a denying [`Verdict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Always [`TOO_MANY_REQUESTS`].
    pub status: u16,
    /// Why the request was denied.
    pub reason: DenyReason,
    /// Effective budget the client was held to, for `X-RateLimit-Limit`.
    pub limit: u32,
    /// Epoch millis, for `X-RateLimit-Reset`.
    pub reset_at: u64,
    /// Seconds, for `Retry-After`.
    pub retry_after_secs: u64,
}

impl Rejection {
    /// Response headers for the rejection.
    ///
    /// `X-RateLimit-Limit` carries the effective budget. For a
    /// reputation-weighted policy that is the scaled value the window check
    /// enforced, not the configured `max_requests`.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", "0".to_string()),
            ("X-RateLimit-Reset", self.reset_at.to_string()),
            ("Retry-After", self.retry_after_secs.to_string()),
        ]
    }

    /// JSON response body.
    pub fn body(&self) -> serde_json::Value {
        json!({ "error": "Too many requests", "retryAfter": self.retry_after_secs })
    }
}
