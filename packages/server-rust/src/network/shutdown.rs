//! Binding lifecycle state and in-flight request accounting.
//!
//! State lives in an `ArcSwap` so health checks read it without locking.
//! In-flight requests are counted by RAII guards; the last guard to drop
//! wakes anyone waiting for the binding to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Lifecycle state of a server binding.
///
/// `Created -> Started -> Draining -> Stopped`. There is no way back from
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Constructed, not yet listening.
    Created,
    /// Listening and serving requests.
    Started,
    /// No longer accepting; in-flight requests are finishing.
    Draining,
    Stopped,
}

impl BindingState {
    /// Lowercase name used in health responses.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BindingState::Created => "created",
            BindingState::Started => "started",
            BindingState::Draining => "draining",
            BindingState::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Per-binding lifecycle state, stop signal and in-flight counter.
///
/// Accept loops select on [`shutdown_receiver`](Self::shutdown_receiver);
/// request tasks hold an [`InFlightGuard`] for as long as they run.
#[derive(Debug)]
pub struct ShutdownController {
    stop_tx: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    state: ArcSwap<BindingState>,
}

impl ShutdownController {
    /// Creates a controller in the `Created` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stop_tx: watch::Sender::new(false),
            in_flight: Arc::default(),
            state: ArcSwap::from_pointee(BindingState::Created),
        }
    }

    #[must_use]
    pub fn state(&self) -> BindingState {
        **self.state.load()
    }

    pub fn set_started(&self) {
        self.state.store(Arc::new(BindingState::Started));
    }

    pub fn set_stopped(&self) {
        self.state.store(Arc::new(BindingState::Stopped));
    }

    /// Receiver whose value flips to `true` once the binding starts draining.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Moves to `Draining` and wakes every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(BindingState::Draining));
        self.stop_tx.send_replace(true);
    }

    /// Counts one in-flight request until the returned guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no request is in flight, or `timeout` elapses.
    ///
    /// Returns `false` on timeout. The state is not changed.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                // Register interest before reading the counter so a guard
                // dropped in between is not missed.
                let notified = self.in_flight.drained.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `signal` reports shutdown, including a shutdown that
/// happened before the call. A dropped controller counts as shutdown.
pub async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stopping| *stopping).await;
}

/// Keeps one request counted as in flight.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
