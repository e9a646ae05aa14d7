//! Telemetry for admission decisions.
//!
//! The middleware turns every verdict into an [`AdmissionEvent`] and hands it
//! to a [`TelemetrySink`]. Sinks are plain `tower::Service`s, so they compose
//! with the usual tower combinators. Emission is best-effort: a sink that is
//! not ready or fails simply loses the event.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{ready, Ready};
use parking_lot::Mutex;
use tower::Service;

use crate::engine::Admission;
use crate::identity::ClientKey;
use crate::verdict::DenyReason;

/// One admission decision, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The request was let through.
    Allowed {
        client: ClientKey,
        route: String,
        remaining: u32,
        whitelisted: bool,
    },
    /// The request was turned away.
    Denied {
        client: ClientKey,
        route: String,
        reason: DenyReason,
        retry_after_secs: u64,
    },
}

impl AdmissionEvent {
    pub fn from_admission(admission: &Admission) -> Self {
        let verdict = &admission.verdict;
        match verdict.reason.filter(|_| !verdict.allowed) {
            Some(reason) => AdmissionEvent::Denied {
                client: admission.client.key.clone(),
                route: admission.route.clone(),
                reason,
                retry_after_secs: verdict.retry_after_secs(admission.evaluated_at),
            },
            None => AdmissionEvent::Allowed {
                client: admission.client.key.clone(),
                route: admission.route.clone(),
                remaining: verdict.remaining,
                whitelisted: verdict.is_whitelisted,
            },
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AdmissionEvent::Denied { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            AdmissionEvent::Denied { reason, .. } => Some(*reason),
            AdmissionEvent::Allowed { .. } => None,
        }
    }

    pub fn client(&self) -> &ClientKey {
        match self {
            AdmissionEvent::Allowed { client, .. } | AdmissionEvent::Denied { client, .. } => client,
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Allowed { client, route, remaining, .. } => {
                write!(f, "Allowed({client} {route}, remaining={remaining})")
            }
            AdmissionEvent::Denied { client, route, reason, retry_after_secs } => {
                write!(f, "Denied({client} {route}, {reason}, retry_after={retry_after_secs}s)")
            }
        }
    }
}

/// A telemetry sink that consumes admission events.
pub trait TelemetrySink:
    Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: AdmissionEvent)
where
    S: Service<AdmissionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events through `tracing` as structured fields.
///
/// Denials are logged at `info` with their reason and retry hint; admissions at
/// `debug`, or not at all when `denials_only` is set.
#[derive(Clone, Debug, Default)]
pub struct LogSink {
    denials_only: bool,
}

impl LogSink {
    /// Only log denied requests.
    pub fn denials_only() -> Self {
        Self { denials_only: true }
    }
}

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        match &event {
            AdmissionEvent::Denied { client, route, reason, retry_after_secs } => {
                tracing::info!(
                    target: "turnstile::telemetry",
                    client = %client,
                    route = %route,
                    reason = reason.as_str(),
                    retry_after_secs,
                    "request denied"
                );
            }
            AdmissionEvent::Allowed { client, route, remaining, whitelisted } if !self.denials_only => {
                tracing::debug!(
                    target: "turnstile::telemetry",
                    client = %client,
                    route = %route,
                    remaining,
                    whitelisted,
                    "request admitted"
                );
            }
            AdmissionEvent::Allowed { .. } => {}
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory; oldest are evicted at capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Retained denials for `reason`, oldest first.
    pub fn denied(&self, reason: DenyReason) -> Vec<AdmissionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.deny_reason() == Some(reason))
            .cloned()
            .collect()
    }

    /// Retained denials per reason.
    pub fn denial_counts(&self) -> HashMap<DenyReason, usize> {
        let mut counts = HashMap::new();
        for reason in self.events.lock().iter().filter_map(AdmissionEvent::deny_reason) {
            *counts.entry(reason).or_insert(0) += 1;
        }
        counts
    }

    /// Retained events for one client, oldest first.
    pub fn for_client(&self, client: &ClientKey) -> Vec<AdmissionEvent> {
        self.events.lock().iter().filter(|e| e.client() == client).cloned().collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut guard = self.events.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
