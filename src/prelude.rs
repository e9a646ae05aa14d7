//! Convenient re-exports for common Turnstile types.
pub use crate::{
    admin::{AdminCommand, AdminHandle, AdminService},
    config::AdmissionConfig,
    engine::AdmissionControl,
    error::{AdmissionError, ConfigError},
    identity::{ClientKey, RequestDescriptor},
    middleware::{AdmissionLayer, Describe},
    policy::Policy,
    telemetry::{LogSink, MemorySink, TelemetrySink},
    verdict::{DenyReason, Rejection, Verdict},
};
