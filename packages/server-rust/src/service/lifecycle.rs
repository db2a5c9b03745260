//! Per-request lifecycle.
//!
//! ```text
//! Received -> Resolved -> ContextReady -> Filtered -> Invoked -> Responded
//!     \__________\____________\______________\___________> Rejected | Errored
//! ```
//!
//! Each step is awaited in order; nothing is speculatively started ahead of
//! the filter chain. Every request ends in exactly one terminal [`Outcome`].

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use switchyard_core::{ErrorKind, RawRequest, Reply, RequestError};
use tracing::{debug, info_span, trace, warn, Instrument, Span};

use super::context::ContextInitializer;
use super::filter::ChainVerdict;
use super::procedure::BoxFuture;
use super::router::ProcedureTable;

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// Position of a request in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Received,
    Resolved,
    ContextReady,
    Filtered,
    Invoked,
    Responded,
    Rejected,
    Errored,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Received => "received",
            LifecycleState::Resolved => "resolved",
            LifecycleState::ContextReady => "context_ready",
            LifecycleState::Filtered => "filtered",
            LifecycleState::Invoked => "invoked",
            LifecycleState::Responded => "responded",
            LifecycleState::Rejected => "rejected",
            LifecycleState::Errored => "errored",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Responded | LifecycleState::Rejected | LifecycleState::Errored
        )
    }

    /// Legal transitions: one step forward, or to a failure exit from any
    /// non-terminal state.
    #[must_use]
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::{
            ContextReady, Errored, Filtered, Invoked, Received, Rejected, Resolved, Responded,
        };
        match (self, next) {
            (from, Rejected | Errored) => !from.is_terminal(),
            (Received, Resolved)
            | (Resolved, ContextReady)
            | (ContextReady, Filtered)
            | (Filtered, Invoked)
            | (Invoked, Responded) => true,
            _ => false,
        }
    }

    fn advance(self, next: LifecycleState) -> LifecycleState {
        debug_assert!(
            self.can_advance_to(next),
            "illegal lifecycle transition {self:?} -> {next:?}"
        );
        trace!(from = self.as_str(), to = next.as_str(), "lifecycle transition");
        next
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of one request.
#[derive(Debug)]
pub enum Outcome {
    /// The handler returned; the reply is ready for serialization.
    Responded(Reply),
    /// A filter denied the request.
    Rejected(RequestError),
    /// Any other failure.
    Errored(RequestError),
}

impl Outcome {
    fn failed(error: RequestError) -> Self {
        if error.kind() == ErrorKind::FilterDenied {
            Outcome::Rejected(error)
        } else {
            Outcome::Errored(error)
        }
    }

    /// The terminal lifecycle state this outcome represents.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        match self {
            Outcome::Responded(_) => LifecycleState::Responded,
            Outcome::Rejected(_) => LifecycleState::Rejected,
            Outcome::Errored(_) => LifecycleState::Errored,
        }
    }

    #[must_use]
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Outcome::Responded(reply) => Some(reply),
            Outcome::Rejected(_) | Outcome::Errored(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            Outcome::Responded(_) => None,
            Outcome::Rejected(e) | Outcome::Errored(e) => Some(e),
        }
    }

    /// Kind of the failure, if the request did not succeed.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(RequestError::kind)
    }

    /// Converts into a `Result`, losing the rejected/errored distinction
    /// (still available through the error kind).
    ///
    /// # Errors
    ///
    /// Returns the terminal error for `Rejected` and `Errored` outcomes.
    pub fn into_result(self) -> Result<Reply, RequestError> {
        match self {
            Outcome::Responded(reply) => Ok(reply),
            Outcome::Rejected(e) | Outcome::Errored(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Runs the lifecycle against a frozen procedure table.
///
/// Cloned into every binding the registry attaches; clones share the table
/// and initializer.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<ProcedureTable>,
    initializer: Arc<dyn ContextInitializer>,
    span: Span,
}

impl Dispatcher {
    pub(crate) fn new(
        table: Arc<ProcedureTable>,
        initializer: Arc<dyn ContextInitializer>,
        span: Span,
    ) -> Self {
        Self {
            table,
            initializer,
            span,
        }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<ProcedureTable> {
        &self.table
    }

    /// Drives one request to a terminal outcome.
    pub async fn dispatch(&self, request: RawRequest) -> Outcome {
        let span = info_span!(parent: &self.span, "request", path = %request.path);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: RawRequest) -> Outcome {
        let state = LifecycleState::Received;

        let Some(descriptor) = self.table.resolve(&request.path).cloned() else {
            let message = format!("no procedure registered at {}", request.path);
            return fail(state, RequestError::new(ErrorKind::UnknownProcedure, message));
        };
        let state = state.advance(LifecycleState::Resolved);

        let request = Arc::new(request);
        let ctx = match self.initializer.init(Arc::clone(&request)).await {
            Ok(ctx) => ctx,
            Err(e) => {
                let error = RequestError::with_source(
                    ErrorKind::ContextInitFailed,
                    format!("context initialization failed: {e}"),
                    e,
                );
                return fail(state, error);
            }
        };
        let state = state.advance(LifecycleState::ContextReady);

        match descriptor.filters().run(&ctx).await {
            ChainVerdict::Continue => {}
            ChainVerdict::Denied { filter } => {
                let error = RequestError::new(
                    ErrorKind::FilterDenied,
                    format!("denied by filter {filter}"),
                );
                return fail(state, error);
            }
            ChainVerdict::Fault { filter, error } => {
                let error = RequestError::with_source(
                    ErrorKind::FilterFault,
                    format!("filter {filter} failed: {error}"),
                    error,
                );
                return fail(state, error);
            }
        }
        let state = state.advance(LifecycleState::Filtered);

        let payload = match descriptor.decode(request.codec, &request.body) {
            Ok(payload) => payload,
            Err(error) => return fail(state, error),
        };

        match descriptor.invoke(ctx, payload).await {
            Ok(reply) => {
                state
                    .advance(LifecycleState::Invoked)
                    .advance(LifecycleState::Responded);
                Outcome::Responded(reply)
            }
            Err(error) => fail(state, error),
        }
    }
}

/// Records a failure exit and builds the outcome.
fn fail(reached: LifecycleState, error: RequestError) -> Outcome {
    let outcome = Outcome::failed(error);
    let terminal = reached.advance(outcome.state());
    if let Some(error) = outcome.error() {
        if error.kind().is_fault() {
            warn!(
                reached = reached.as_str(),
                state = terminal.as_str(),
                kind = error.kind().as_str(),
                "request failed: {}",
                error.message()
            );
        } else {
            debug!(
                reached = reached.as_str(),
                state = terminal.as_str(),
                kind = error.kind().as_str(),
                "request not served: {}",
                error.message()
            );
        }
    }
    outcome
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("procedures", &self.table.len())
            .finish_non_exhaustive()
    }
}

impl tower::Service<RawRequest> for Dispatcher {
    type Response = Outcome;
    type Error = Infallible;
    type Future = BoxFuture<Result<Outcome, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RawRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(request).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
