//! Transport binding contract and the lifecycle plumbing shared by the
//! built-in bindings.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::DeclarationError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use super::shutdown::{BindingState, ShutdownController};
use crate::service::lifecycle::Dispatcher;

/// A transport adapter that runs the request lifecycle for its inbound
/// requests.
///
/// The registry calls `install` exactly once, when the binding is attached.
/// `start` and `stop` are independent of other bindings.
#[async_trait]
pub trait ServerBinding: Send + Sync {
    /// Unique name within one registry, used in logs and aggregate errors.
    fn name(&self) -> &str;

    /// Hands the binding its frozen dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `DeclarationError::AlreadyAttached` if a dispatcher was
    /// already installed.
    fn install(&self, dispatcher: Dispatcher) -> Result<(), DeclarationError>;

    /// Begins accepting requests.
    ///
    /// # Errors
    ///
    /// Fails when no dispatcher is installed, when the binding is not in the
    /// `Created` state, or when the transport cannot bind.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stops accepting requests and lets in-flight requests drain.
    ///
    /// # Errors
    ///
    /// Fails when the binding is not `Started` or its serve task failed.
    async fn stop(&self) -> anyhow::Result<()>;

    fn state(&self) -> BindingState;
}

// ---------------------------------------------------------------------------
// BindingCore
// ---------------------------------------------------------------------------

/// Task serving a started binding until its shutdown signal fires.
pub(crate) type ServeTask = JoinHandle<anyhow::Result<()>>;

/// Lifecycle bookkeeping shared by [`HttpBinding`](super::http::HttpBinding)
/// and [`SocketBinding`](super::socket::SocketBinding).
pub(crate) struct BindingCore {
    name: String,
    drain_timeout: Duration,
    dispatcher: OnceLock<Dispatcher>,
    shutdown: Arc<ShutdownController>,
    task: Mutex<Option<ServeTask>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl BindingCore {
    pub(crate) fn new(name: impl Into<String>, drain_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            drain_timeout,
            dispatcher: OnceLock::new(),
            shutdown: Arc::new(ShutdownController::new()),
            task: Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shutdown(&self) -> &Arc<ShutdownController> {
        &self.shutdown
    }

    pub(crate) fn state(&self) -> BindingState {
        self.shutdown.state()
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub(crate) fn install(&self, dispatcher: Dispatcher) -> Result<(), DeclarationError> {
        self.dispatcher
            .set(dispatcher)
            .map_err(|_| DeclarationError::AlreadyAttached {
                binding: self.name.clone(),
            })
    }

    /// Runs `launch` under the start lock if the binding may start.
    ///
    /// `launch` binds the transport and spawns the serve task; on success the
    /// binding becomes `Started`.
    pub(crate) async fn start<F, Fut>(&self, launch: F) -> anyhow::Result<()>
    where
        F: FnOnce(Dispatcher) -> Fut + Send,
        Fut: std::future::Future<Output = anyhow::Result<(SocketAddr, ServeTask)>> + Send,
    {
        let mut task = self.task.lock().await;

        let state = self.shutdown.state();
        if state != BindingState::Created {
            anyhow::bail!(
                "binding {} cannot start from state {}",
                self.name,
                state.as_str()
            );
        }
        let Some(dispatcher) = self.dispatcher.get().cloned() else {
            anyhow::bail!("binding {} has no dispatcher installed", self.name);
        };

        let (addr, handle) = launch(dispatcher).await?;
        *task = Some(handle);
        *self.local_addr.lock() = Some(addr);
        self.shutdown.set_started();

        info!(binding = %self.name, %addr, "binding started");
        Ok(())
    }

    /// Signals the serve task, then waits for it and for in-flight requests,
    /// both bounded by one `drain_timeout` deadline. A serve task still
    /// running at the deadline is aborted.
    pub(crate) async fn stop(&self) -> anyhow::Result<()> {
        let mut task = self.task.lock().await;

        let state = self.shutdown.state();
        if state != BindingState::Started {
            anyhow::bail!(
                "binding {} cannot stop from state {}",
                self.name,
                state.as_str()
            );
        }

        self.shutdown.trigger_shutdown();
        let deadline = Instant::now() + self.drain_timeout;

        let served = match task.take() {
            Some(mut handle) => match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(anyhow::anyhow!(
                    "serve task for {} panicked: {e}",
                    self.name
                )),
                Err(_) => {
                    handle.abort();
                    warn!(
                        binding = %self.name,
                        "serve task outlived the drain timeout, aborted"
                    );
                    Ok(())
                }
            },
            None => Ok(()),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.shutdown.wait_for_drain(remaining).await {
            warn!(
                binding = %self.name,
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout elapsed with requests still in flight"
            );
        }
        self.shutdown.set_stopped();

        info!(binding = %self.name, "binding stopped");
        served
    }
}

impl std::fmt::Debug for BindingCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingCore")
            .field("name", &self.name)
            .field("state", &self.shutdown.state())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}
