#![forbid(unsafe_code)]

//! # Turnstile
//!
//! Adaptive request admission for async services: per-route sliding windows,
//! burst detection, a suspicious-activity classifier with hard blocks, and a
//! per-client reputation score that scales route budgets.
//!
//! ## Features
//!
//! - **Sliding-window limits** per client and route pattern
//! - **Burst caps** over a short horizon
//! - **Suspicion scoring** (bot user agents, sensitive paths, abnormal rates) with temporary blocks
//! - **Reputation** that grows with good behaviour and shrinks with denials
//! - **Allow/deny lists** editable at runtime
//! - **Tower middleware** that turns denials into `429 Too Many Requests`
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile::{AdmissionConfig, AdmissionControl, Policy, RequestDescriptor};
//!
//! let config = AdmissionConfig::builder()
//!     .policy("/api/auth/login", Policy::new(Duration::from_secs(60), 5))
//!     .burst_limit(20)
//!     .build()
//!     .expect("valid config");
//! let control = AdmissionControl::new(&config).expect("engine");
//!
//! let req = RequestDescriptor::new("/api/auth/login")
//!     .header("user-agent", "Mozilla/5.0")
//!     .remote_ip("198.51.100.7".parse().unwrap());
//! let verdict = control.check(&req);
//! assert!(verdict.allowed);
//! assert_eq!(verdict.remaining, 4);
//! ```

pub mod adaptive;
pub mod admin;
pub mod burst;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod policy;
pub mod prelude;
pub mod reputation;
pub mod store;
pub mod telemetry;
pub mod verdict;
pub mod window;

// Re-exports
pub use adaptive::DynamicConfig;
pub use admin::{AdminCommand, AdminHandle, AdminResponse, AdminService, ClientSnapshot, RouteUsage};
pub use burst::{BurstDetector, BurstOutcome};
pub use classifier::{Classification, ClassifierConfig, Signal, SuspicionClassifier, SuspiciousActivity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AdmissionConfig, AdmissionConfigBuilder, AdmissionSettings, StoreConfig};
pub use engine::{Admission, AdmissionControl, AdmissionControlBuilder};
pub use error::{AdminError, AdmissionError, ConfigError};
pub use identity::{ClientIdentity, ClientKey, ClientResolver, RequestDescriptor, ResolverConfig};
pub use middleware::{AdmissionLayer, AdmissionService, Describe};
pub use policy::{Policy, PolicyRegistry};
pub use reputation::{effective_max, ReputationTracker};
pub use store::{InMemoryStore, KeyLocks, Store};
pub use telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink};
pub use verdict::{DenyReason, Rejection, Verdict};
pub use window::{SlidingWindow, TimestampLog, WindowOutcome};
