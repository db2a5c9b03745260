//! Service registry: collects procedure descriptors, freezes them into a
//! dispatcher on first attach, and fans lifecycle calls out to bindings.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use switchyard_core::DeclarationError;
use tracing::{info, warn, Span};

use super::context::{ContextInitializer, DefaultContextInitializer};
use super::definition::{RpcService, ServiceDefinition};
use super::lifecycle::Dispatcher;
use super::procedure::ProcedureDescriptor;
use super::router::ProcedureTable;
use crate::network::ServerBinding;

// ---------------------------------------------------------------------------
// BindingFailures
// ---------------------------------------------------------------------------

/// One binding that failed to start or stop.
#[derive(Debug)]
pub struct BindingFailure {
    pub binding: String,
    pub error: anyhow::Error,
}

/// Aggregate error of `start_all` / `stop_all`.
///
/// Bindings that succeeded are left as they are; there is no rollback.
#[derive(Debug, thiserror::Error)]
#[error(
    "{} of {} bindings failed to {}: {}",
    .failures.len(),
    .total,
    .action,
    describe(.failures)
)]
pub struct BindingFailures {
    pub action: &'static str,
    pub total: usize,
    pub failures: Vec<BindingFailure>,
}

impl BindingFailures {
    /// Names of the failing bindings, in attach order.
    pub fn bindings(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.binding.as_str())
    }
}

fn describe(failures: &[BindingFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {:#}", f.binding, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

struct RegistryState {
    descriptors: Vec<Arc<ProcedureDescriptor>>,
    paths: HashSet<String>,
    initializer: Arc<dyn ContextInitializer>,
    /// Set by the first successful attach; its presence means frozen.
    dispatcher: Option<Dispatcher>,
    bindings: Vec<Arc<dyn ServerBinding>>,
}

/// Registry of services and the bindings that serve them.
///
/// Mutable until the first binding is attached. From then on registration
/// and initializer changes are rejected, and every binding shares the same
/// frozen procedure table.
pub struct ServiceRegistry {
    span: Span,
    state: RwLock<RegistryState>,
}

impl ServiceRegistry {
    /// Creates an empty registry that logs into the current span.
    #[must_use]
    pub fn new() -> Self {
        Self::with_span(Span::current())
    }

    /// Creates an empty registry whose discovery, lifecycle, and per-request
    /// events are emitted under `span`.
    #[must_use]
    pub fn with_span(span: Span) -> Self {
        Self {
            span,
            state: RwLock::new(RegistryState {
                descriptors: Vec::new(),
                paths: HashSet::new(),
                initializer: Arc::new(DefaultContextInitializer),
                dispatcher: None,
                bindings: Vec::new(),
            }),
        }
    }

    /// Registers a service instance.
    ///
    /// # Errors
    ///
    /// See [`register_arc`](Self::register_arc).
    pub fn register<S: RpcService>(&self, service: S) -> Result<(), DeclarationError> {
        self.register_arc(Arc::new(service))
    }

    /// Registers a shared service instance.
    ///
    /// All of the service's procedures are added or none are.
    ///
    /// # Errors
    ///
    /// - `Frozen` once a binding has been attached
    /// - `InvalidName` if the service or a method name is not an identifier
    /// - `DuplicatePath` if a derived path is already registered or is
    ///   declared twice by this service
    pub fn register_arc<S: RpcService>(&self, service: Arc<S>) -> Result<(), DeclarationError> {
        const ACTION: &str = "register a service";

        if self.is_frozen() {
            return Err(DeclarationError::Frozen { action: ACTION });
        }

        let definition = ServiceDefinition::of(service);
        let service_name = definition.name().to_string();
        let descriptors = definition.into_descriptors()?;

        let mut state = self.state.write();
        if state.dispatcher.is_some() {
            return Err(DeclarationError::Frozen { action: ACTION });
        }

        let mut batch = HashSet::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let path = descriptor.path();
            if state.paths.contains(path) || !batch.insert(path) {
                return Err(DeclarationError::DuplicatePath {
                    path: path.to_string(),
                });
            }
        }

        if descriptors.is_empty() {
            warn!(parent: &self.span, service = %service_name, "service declares no procedures");
        }

        for descriptor in descriptors {
            info!(
                parent: &self.span,
                service = %service_name,
                path = descriptor.path(),
                request = descriptor.request_type().map_or("-", |t| t.name()),
                response = descriptor.response_type().map_or("-", |t| t.name()),
                filters = descriptor.filters().len(),
                "procedure discovered"
            );
            state.paths.insert(descriptor.path().to_string());
            state.descriptors.push(Arc::new(descriptor));
        }

        Ok(())
    }

    /// Replaces the initializer that builds each request's `Context`.
    ///
    /// # Errors
    ///
    /// Returns `Frozen` once a binding has been attached.
    pub fn set_context_initializer(
        &self,
        initializer: Arc<dyn ContextInitializer>,
    ) -> Result<(), DeclarationError> {
        let mut state = self.state.write();
        if state.dispatcher.is_some() {
            return Err(DeclarationError::Frozen {
                action: "replace the context initializer",
            });
        }
        state.initializer = initializer;
        Ok(())
    }

    /// Attaches a binding, freezing the registry on first use.
    ///
    /// The binding receives the shared dispatcher (frozen table plus context
    /// initializer). A failed attach leaves the registry unchanged.
    ///
    /// # Errors
    ///
    /// - `EmptyTable` if no procedure is registered
    /// - `AlreadyAttached` if a binding with the same name is attached, or
    ///   the binding already holds a dispatcher
    pub fn attach(&self, binding: Arc<dyn ServerBinding>) -> Result<(), DeclarationError> {
        let mut state = self.state.write();

        if state.descriptors.is_empty() {
            return Err(DeclarationError::EmptyTable {
                binding: binding.name().to_string(),
            });
        }
        if state.bindings.iter().any(|b| b.name() == binding.name()) {
            return Err(DeclarationError::AlreadyAttached {
                binding: binding.name().to_string(),
            });
        }

        let freezing = state.dispatcher.is_none();
        let dispatcher = match &state.dispatcher {
            Some(dispatcher) => dispatcher.clone(),
            None => Dispatcher::new(
                Arc::new(ProcedureTable::from_descriptors(&state.descriptors)),
                Arc::clone(&state.initializer),
                self.span.clone(),
            ),
        };

        binding.install(dispatcher.clone())?;

        if freezing {
            info!(
                parent: &self.span,
                procedures = state.descriptors.len(),
                "registry frozen"
            );
            state.dispatcher = Some(dispatcher);
        }
        info!(parent: &self.span, binding = binding.name(), "binding attached");
        state.bindings.push(binding);
        Ok(())
    }

    /// Starts every attached binding concurrently and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns `BindingFailures` naming each binding that failed. The others
    /// stay started.
    pub async fn start_all(&self) -> Result<(), BindingFailures> {
        let bindings = self.bindings();
        info!(parent: &self.span, bindings = bindings.len(), "starting bindings");
        let results = join_all(bindings.iter().map(|b| b.start())).await;
        self.aggregate("start", &bindings, results)
    }

    /// Stops every attached binding concurrently and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns `BindingFailures` naming each binding that failed to stop.
    pub async fn stop_all(&self) -> Result<(), BindingFailures> {
        let bindings = self.bindings();
        info!(parent: &self.span, bindings = bindings.len(), "stopping bindings");
        let results = join_all(bindings.iter().map(|b| b.stop())).await;
        self.aggregate("stop", &bindings, results)
    }

    fn aggregate(
        &self,
        action: &'static str,
        bindings: &[Arc<dyn ServerBinding>],
        results: Vec<anyhow::Result<()>>,
    ) -> Result<(), BindingFailures> {
        let failures: Vec<_> = bindings
            .iter()
            .zip(results)
            .filter_map(|(binding, result)| {
                result.err().map(|error| {
                    warn!(
                        parent: &self.span,
                        binding = binding.name(),
                        "binding failed to {action}: {error:#}"
                    );
                    BindingFailure {
                        binding: binding.name().to_string(),
                        error,
                    }
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BindingFailures {
                action,
                total: bindings.len(),
                failures,
            })
        }
    }

    /// Registered descriptors, in registration order.
    #[must_use]
    pub fn procedures(&self) -> Vec<Arc<ProcedureDescriptor>> {
        self.state.read().descriptors.clone()
    }

    /// Attached bindings, in attach order.
    #[must_use]
    pub fn bindings(&self) -> Vec<Arc<dyn ServerBinding>> {
        self.state.read().bindings.clone()
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.state.read().dispatcher.is_some()
    }

    /// The shared dispatcher, once frozen.
    #[must_use]
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.state.read().dispatcher.clone()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ServiceRegistry")
            .field("procedures", &state.descriptors.len())
            .field("bindings", &state.bindings.len())
            .field("frozen", &state.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
