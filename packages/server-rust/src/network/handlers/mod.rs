//! axum handlers of the HTTP binding and the state they share.

pub mod dispatch;
pub mod health;

pub use dispatch::dispatch_handler;
pub use health::{health_handler, liveness_handler, readiness_handler, HealthReport};

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;

use super::config::HttpBindingConfig;
use super::shutdown::ShutdownController;
use super::status::ErrorCodeTable;
use crate::service::middleware::DispatchPipeline;
use crate::service::router::ProcedureTable;

/// Per-binding state handed to every handler through `State`.
#[derive(Clone)]
pub struct AppState {
    /// Name of the binding serving this router.
    pub binding: Arc<str>,
    /// Dispatcher wrapped in the request middleware.
    pub pipeline: DispatchPipeline,
    /// Frozen procedure table, reported by the health endpoint.
    pub table: Arc<ProcedureTable>,
    /// Graceful shutdown controller with binding state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Binding configuration (bind address, body limit, default codec).
    pub config: Arc<HttpBindingConfig>,
    /// Error kind to HTTP status mapping.
    pub codes: Arc<ErrorCodeTable<StatusCode>>,
    /// Binding start time, used for uptime calculation.
    pub start_time: Instant,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Instant;

    use serde::{Deserialize, Serialize};
    use switchyard_core::{Context, Message};
    use tracing::Span;

    use super::*;
    use crate::service::context::DefaultContextInitializer;
    use crate::service::definition::{ProcedureSet, RpcService, ServiceDefinition};
    use crate::service::filter::{filter_fn, SharedFilter};
    use crate::service::lifecycle::Dispatcher;
    use crate::service::middleware::build_dispatch_pipeline;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Text {
        pub text: String,
    }

    impl Message for Text {}

    /// `Echo` with a `Repeat` procedure guarded by an `x-auth` header check
    /// on `Guarded`.
    pub struct Echo;

    impl RpcService for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        fn procedures(set: &mut ProcedureSet<Self>) {
            set.unary("Repeat", |_svc, _ctx, req: Text| async move { Ok(req) });
            let auth: SharedFilter = filter_fn("RequireAuthHeader", |ctx: Context| async move {
                Ok(ctx.header("x-auth").is_some())
            });
            set.unary("Guarded", |_svc, _ctx, req: Text| async move { Ok(req) })
                .filter(auth);
        }
    }

    pub fn app_state() -> AppState {
        let descriptors: Vec<_> = ServiceDefinition::of(Arc::new(Echo))
            .into_descriptors()
            .unwrap()
            .into_iter()
            .map(Arc::new)
            .collect();
        let table = Arc::new(ProcedureTable::from_descriptors(&descriptors));
        let dispatcher = Dispatcher::new(
            Arc::clone(&table),
            Arc::new(DefaultContextInitializer),
            Span::none(),
        );
        AppState {
            binding: Arc::from("http"),
            pipeline: build_dispatch_pipeline(dispatcher),
            table,
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(HttpBindingConfig::default()),
            codes: Arc::new(ErrorCodeTable::http()),
            start_time: Instant::now(),
        }
    }
}
