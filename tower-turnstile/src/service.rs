use std::future::Future;
use std::hash::Hash;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;
use tracing::warn;

use turnstile::ClientRegistry;
use turnstile::Reason;

use crate::error::AdmissionError;
use crate::extract::KeyExtractor;

#[derive(Clone, Debug)]
struct AdmissionServiceMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    extraction_failed: Counter<u64>,
}

/// Admits or rejects each request against its client's token bucket.
///
/// Readiness is delegated to the inner service. The admission decision is made in
/// `call`, because the client is only known once the request is in hand.
#[derive(Debug)]
pub struct AdmissionService<S, X, K>
where
    K: Hash + Eq,
{
    inner: S,
    registry: Arc<ClientRegistry<K>>,
    extractor: X,
    instruments: AdmissionServiceMetrics,
}

pin_project! {
    /// Either the inner service's future or an immediate rejection.
    pub struct ResponseFuture<F> {
        #[pin]
        kind: Kind<F>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F> {
        Called {
            #[pin]
            future: F,
        },
        Rejected {
            error: AdmissionError,
        },
    }
}

impl<F> ResponseFuture<F> {
    fn called(future: F) -> Self {
        Self {
            kind: Kind::Called { future },
        }
    }

    fn rejected(error: AdmissionError) -> Self {
        Self {
            kind: Kind::Rejected { error },
        }
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().kind.project() {
            KindProj::Called { future } => future.poll(cx).map_err(Into::into),
            KindProj::Rejected { error } => Poll::Ready(Err(Box::new(error.clone()))),
        }
    }
}

impl<S, X, K> Clone for AdmissionService<S, X, K>
where
    S: Clone,
    X: Clone,
    K: Hash + Eq,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            registry: Arc::clone(&self.registry),
            extractor: self.extractor.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, X, K, Req> Service<Req> for AdmissionService<S, X, K>
where
    S: Service<Req>,
    S::Error: Into<BoxError>,
    X: KeyExtractor<Req, Key = K>,
    K: Hash + Eq + Clone + std::fmt::Debug,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = match self.extractor.extract(&req) {
            Ok(key) => key,
            Err(err) => {
                self.instruments.extraction_failed.add(1, &[]);
                warn!(%err, "could not identify client");
                return ResponseFuture::rejected(AdmissionError::Extraction(err));
            }
        };

        match self.registry.check(key.clone()) {
            ControlFlow::Continue(()) => {
                self.instruments.admitted.add(1, &[]);
                ResponseFuture::called(self.inner.call(req))
            }
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                self.instruments.rejected.add(1, &[]);
                debug!(?key, ?retry_after, "client at capacity");
                ResponseFuture::rejected(AdmissionError::RateLimited { retry_after })
            }
        }
    }
}

impl<S, X, K> AdmissionService<S, X, K>
where
    K: Hash + Eq,
{
    pub fn new(inner: S, registry: Arc<ClientRegistry<K>>, extractor: X) -> Self {
        let meter = global::meter("admission_service");
        let instruments = AdmissionServiceMetrics {
            admitted: meter.u64_counter("admission_admitted").build(),
            rejected: meter.u64_counter("admission_rejected").build(),
            extraction_failed: meter.u64_counter("admission_extraction_failed").build(),
        };

        Self {
            inner,
            registry,
            extractor,
            instruments,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry<K>> {
        &self.registry
    }
}
