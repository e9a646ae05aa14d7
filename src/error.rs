//! Error types for the admission layer.
//!
//! The admission check itself never fails; these errors only appear at the
//! edges: loading configuration, running administrative commands, and the
//! tower middleware surfacing a rejection to its caller.
use std::fmt;
use std::path::PathBuf;

use crate::verdict::Rejection;

/// Errors produced while building or loading an [`AdmissionConfig`](crate::config::AdmissionConfig).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A policy window must be strictly positive.
    #[error("policy '{route}': window must be > 0")]
    ZeroWindow {
        /// Route pattern of the offending policy.
        route: String,
    },
    /// A policy must admit at least one request per window.
    #[error("policy '{route}': max_requests must be > 0")]
    ZeroMaxRequests {
        /// Route pattern of the offending policy.
        route: String,
    },
    /// Burst limits, when present, must be positive.
    #[error("policy '{route}': burst_limit must be > 0 when set")]
    ZeroBurstLimit {
        /// Route pattern of the offending policy (or `global`).
        route: String,
    },
    /// A classifier, store or resolver setting is out of range.
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting {
        /// Name of the setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// An allow/deny list entry is not an IP address.
    #[error("invalid IP address in {list}: '{value}'")]
    InvalidAddress {
        /// `blacklist` or `whitelist`.
        list: &'static str,
        /// The raw entry.
        value: String,
    },
    /// The configuration document could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by administrative operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdminError {
    /// Caller supplied an argument that could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgs(String),
    /// The command payload could not be decoded.
    #[error("malformed command: {0}")]
    Malformed(String),
}

/// Error returned by [`AdmissionService`](crate::middleware::AdmissionService).
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The admission check denied the request; carries the 429 mapping.
    Rejected(Rejection),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(rejection) => write!(
                f,
                "request rejected: {} (retry after {}s)",
                rejection.reason, rejection.retry_after_secs
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if the request was turned away by the admission check.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Borrow the rejection details if present.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }
}
