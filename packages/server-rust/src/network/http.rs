//! HTTP binding: serves every registered procedure at `POST /<Service>.<Method>`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use switchyard_core::DeclarationError;
use tokio::net::TcpListener;

use super::binding::{BindingCore, ServerBinding};
use super::config::HttpBindingConfig;
use super::handlers::{
    dispatch_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::with_http_layers;
use super::shutdown::{shutdown_requested, BindingState, ShutdownController};
use super::status::ErrorCodeTable;
use crate::service::lifecycle::Dispatcher;
use crate::service::middleware::build_dispatch_pipeline;

/// axum-based transport binding.
///
/// Routes:
/// - `GET /health` -- binding health JSON
/// - `GET /health/live` -- liveness check
/// - `GET /health/ready` -- readiness check
/// - anything else -- dispatched as a procedure call (`POST` only)
pub struct HttpBinding {
    core: BindingCore,
    config: Arc<HttpBindingConfig>,
    codes: Arc<ErrorCodeTable<StatusCode>>,
}

impl HttpBinding {
    #[must_use]
    pub fn new(name: impl Into<String>, config: HttpBindingConfig) -> Self {
        Self {
            core: BindingCore::new(name, config.drain_timeout),
            config: Arc::new(config),
            codes: Arc::new(ErrorCodeTable::http()),
        }
    }

    /// Replaces the default HTTP error-code mapping.
    #[must_use]
    pub fn with_error_codes(mut self, codes: ErrorCodeTable<StatusCode>) -> Self {
        self.codes = Arc::new(codes);
        self
    }

    /// Address the listener is bound to, once started.
    ///
    /// Differs from the configured port when port 0 is used.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(self.core.shutdown())
    }

    fn build_router(&self, dispatcher: Dispatcher) -> Router {
        let state = AppState {
            binding: Arc::from(self.core.name()),
            table: Arc::clone(dispatcher.table()),
            pipeline: build_dispatch_pipeline(dispatcher),
            shutdown: Arc::clone(self.core.shutdown()),
            config: Arc::clone(&self.config),
            codes: Arc::clone(&self.codes),
            start_time: Instant::now(),
        };

        let routes = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .fallback(dispatch_handler);
        with_http_layers(routes, self.core.name(), &self.config).with_state(state)
    }
}

#[async_trait]
impl ServerBinding for HttpBinding {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn install(&self, dispatcher: Dispatcher) -> Result<(), DeclarationError> {
        self.core.install(dispatcher)
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.core
            .start(|dispatcher| async move {
                let listener = TcpListener::bind(self.config.bind_addr()).await?;
                let addr = listener.local_addr()?;
                let router = self.build_router(dispatcher);
                let mut signal = self.core.shutdown().shutdown_receiver();

                let handle = tokio::spawn(async move {
                    axum::serve(
                        listener,
                        router.into_make_service_with_connect_info::<SocketAddr>(),
                    )
                    .with_graceful_shutdown(async move { shutdown_requested(&mut signal).await })
                    .await?;
                    Ok(())
                });
                Ok((addr, handle))
            })
            .await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.core.stop().await
    }

    fn state(&self) -> BindingState {
        self.core.state()
    }
}

impl std::fmt::Debug for HttpBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBinding")
            .field("core", &self.core)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
