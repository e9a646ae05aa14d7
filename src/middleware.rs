use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tower_layer::Layer;
use tower_service::Service;

use crate::engine::AdmissionControl;
use crate::error::AdmissionError;
use crate::identity::RequestDescriptor;
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, TelemetrySink};
use crate::verdict::Rejection;

/// Requests the admission layer can inspect.
///
/// Implement this for your framework's request type to map its path, matched
/// route, headers and peer address into a [`RequestDescriptor`].
pub trait Describe {
    fn describe(&self) -> RequestDescriptor;
}

impl Describe for RequestDescriptor {
    fn describe(&self) -> RequestDescriptor {
        self.clone()
    }
}

/// A layer that runs every request through an [`AdmissionControl`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer<T = NullSink> {
    control: Arc<AdmissionControl>,
    sink: T,
}

impl AdmissionLayer<NullSink> {
    /// Create a new admission layer without telemetry.
    pub fn new(control: Arc<AdmissionControl>) -> Self {
        Self { control, sink: NullSink }
    }
}

impl<T> AdmissionLayer<T> {
    /// Emit an [`AdmissionEvent`] per request to `sink`.
    pub fn with_sink<U: TelemetrySink>(self, sink: U) -> AdmissionLayer<U> {
        AdmissionLayer { control: self.control, sink }
    }
}

impl<S, T> Layer<S> for AdmissionLayer<T>
where
    T: Clone,
{
    type Service = AdmissionService<S, T>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, control: self.control.clone(), sink: self.sink.clone() }
    }
}

/// Middleware service that enforces admission verdicts.
#[derive(Clone, Debug)]
pub struct AdmissionService<S, T = NullSink> {
    inner: S,
    control: Arc<AdmissionControl>,
    sink: T,
}

impl<S, T> AdmissionService<S, T>
where
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    // Telemetry needs a runtime to run on; without one the event is dropped.
    fn emit(&self, event: AdmissionEvent) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(emit_best_effort(self.sink.clone(), event));
        }
    }
}

impl<S, T, Req> Service<Req> for AdmissionService<S, T>
where
    S: Service<Req>,
    Req: Describe,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let admission = self.control.evaluate(&req.describe());
        self.emit(AdmissionEvent::from_admission(&admission));
        match admission.verdict.rejection(admission.evaluated_at) {
            Some(rejection) => ResponseFuture::Rejected { rejection },
            None => ResponseFuture::Admitted { inner: self.inner.call(req) },
        }
    }
}

/// Response future of [`AdmissionService`].
#[pin_project(project = ResponseFutureProj)]
#[derive(Debug)]
pub enum ResponseFuture<F> {
    /// The request was admitted and forwarded.
    Admitted {
        #[pin]
        inner: F,
    },
    /// The request was denied before reaching the inner service.
    Rejected { rejection: Rejection },
}

impl<F, R, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<R, E>>,
{
    type Output = Result<R, AdmissionError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Admitted { inner } => inner.poll(cx).map_err(AdmissionError::Inner),
            ResponseFutureProj::Rejected { rejection } => {
                Poll::Ready(Err(AdmissionError::Rejected(rejection.clone())))
            }
        }
    }
}
