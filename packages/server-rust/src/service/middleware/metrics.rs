//! Per-request timing and outcome accounting around the dispatcher.
//!
//! Every request gets a `dispatch` span. When it finishes, the outcome is
//! logged and fed to the `metrics` facade (a no-op until the host process
//! installs a recorder).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use switchyard_core::RawRequest;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

use crate::service::lifecycle::Outcome;

/// Counter of completed requests, labelled by `path`, `outcome` and `kind`.
pub const REQUESTS_TOTAL: &str = "switchyard_requests_total";
/// Histogram of request durations in seconds, labelled by `path`.
pub const REQUEST_DURATION_SECONDS: &str = "switchyard_request_duration_seconds";

/// Wraps a dispatch service in [`MetricsService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<RawRequest> for MetricsService<S>
where
    S: Service<RawRequest, Response = Outcome> + Send,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Outcome;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Outcome, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RawRequest) -> Self::Future {
        let path = request.path.clone();
        let span = info_span!(
            "dispatch",
            path = %path,
            outcome = field::Empty,
            elapsed_us = field::Empty,
        );
        let started = Instant::now();
        let pending = self.inner.call(request);

        Box::pin(
            async move {
                let result = pending.await;
                if let Ok(outcome) = &result {
                    record(&path, outcome, started.elapsed());
                }
                result
            }
            .instrument(span),
        )
    }
}

/// Emits the completion event and metric samples for one request.
fn record(path: &str, outcome: &Outcome, elapsed: Duration) {
    let state = outcome.state().as_str();
    let kind = outcome.error_kind().map_or("none", |k| k.as_str());
    let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

    let span = Span::current();
    span.record("outcome", state);
    span.record("elapsed_us", elapsed_us);
    tracing::info!(outcome = state, kind, elapsed_us, "request complete");

    let path = path.to_string();
    metrics::counter!(REQUESTS_TOTAL, "path" => path.clone(), "outcome" => state, "kind" => kind)
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "path" => path).record(elapsed.as_secs_f64());
}
