//! Pipeline composition: wraps the dispatcher in the request middleware.

use switchyard_core::RawRequest;
use tower::{ServiceBuilder, ServiceExt};

use super::metrics::{MetricsLayer, MetricsService};
use crate::service::lifecycle::{Dispatcher, Outcome};

/// The service every built-in binding sends its requests through.
pub type DispatchPipeline = MetricsService<Dispatcher>;

/// Build the dispatch pipeline by wrapping the `Dispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome
///
/// The dispatcher never fails and never applies backpressure, so the
/// pipeline is always ready.
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: Dispatcher) -> DispatchPipeline {
    ServiceBuilder::new().layer(MetricsLayer).service(dispatcher)
}

/// Runs one request through a clone of the pipeline.
pub async fn run_pipeline(pipeline: &DispatchPipeline, request: RawRequest) -> Outcome {
    match pipeline.clone().oneshot(request).await {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use serde::{Deserialize, Serialize};
    use switchyard_core::{Codec, ErrorKind, Message};
    use tracing::Span;

    use super::*;
    use crate::service::context::DefaultContextInitializer;
    use crate::service::definition::{ProcedureSet, RpcService, ServiceDefinition};
    use crate::service::lifecycle::LifecycleState;
    use crate::service::router::ProcedureTable;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {}

    struct Pinger;

    impl RpcService for Pinger {
        fn name(&self) -> &str {
            "Pinger"
        }

        fn procedures(set: &mut ProcedureSet<Self>) {
            set.unary("Ping", |_svc, _ctx, ping: Ping| async move {
                Ok(Ping { seq: ping.seq + 1 })
            });
        }
    }

    fn pipeline() -> DispatchPipeline {
        let descriptors: Vec<_> = ServiceDefinition::of(Arc::new(Pinger))
            .into_descriptors()
            .unwrap()
            .into_iter()
            .map(Arc::new)
            .collect();
        let table = Arc::new(ProcedureTable::from_descriptors(&descriptors));
        build_dispatch_pipeline(Dispatcher::new(
            table,
            Arc::new(DefaultContextInitializer),
            Span::none(),
        ))
    }

    #[tokio::test]
    async fn pipeline_routes_through_dispatcher() {
        let body = Codec::MsgPack.encode(&Ping { seq: 1 }).unwrap();
        let outcome = run_pipeline(&pipeline(), RawRequest::new("/Pinger.Ping", body)).await;

        assert_eq!(outcome.state(), LifecycleState::Responded);
        assert_eq!(
            outcome.reply().unwrap().downcast_ref::<Ping>(),
            Some(&Ping { seq: 2 })
        );
    }

    #[tokio::test]
    async fn pipeline_reports_unknown_paths() {
        let request = RawRequest::new("/Pinger.Pong", Bytes::new());
        let outcome = run_pipeline(&pipeline(), request).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownProcedure));
    }
}
