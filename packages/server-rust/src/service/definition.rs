//! Service declaration.
//!
//! A service lists its procedures once, through a [`ProcedureSet`]. The
//! handler signature rules (context first, at most one request message, a
//! message or nothing as the result) are expressed as trait bounds on the
//! `ProcedureSet` methods, so an ill-formed handler does not compile. What
//! remains to check at registration time is naming; see
//! [`ServiceDefinition::into_descriptors`].

use std::future::Future;
use std::sync::Arc;

use switchyard_core::{Context, DeclarationError, Message, MessageType, Reply};

use super::filter::{FilterChain, SharedFilter};
use super::procedure::{
    decode_payload, BoxFuture, Invocation, NullaryFn, Payload, ProcedureDescriptor, UnaryFn,
};

// ---------------------------------------------------------------------------
// RpcService trait
// ---------------------------------------------------------------------------

/// An application service whose procedures are exposed over the network.
///
/// ```ignore
/// struct Echo;
///
/// impl RpcService for Echo {
///     fn name(&self) -> &str {
///         "Echo"
///     }
///
///     fn procedures(set: &mut ProcedureSet<Self>) {
///         set.unary("Repeat", |_svc, _ctx, req: Text| async move { Ok(req) });
///     }
/// }
/// ```
pub trait RpcService: Send + Sync + Sized + 'static {
    /// Service name, the first half of every procedure path.
    fn name(&self) -> &str;

    /// Filters applied before every procedure's own filters.
    fn filters(&self) -> Vec<SharedFilter> {
        Vec::new()
    }

    /// Declares the exposed procedures.
    fn procedures(set: &mut ProcedureSet<Self>);
}

// ---------------------------------------------------------------------------
// ProcedureSet
// ---------------------------------------------------------------------------

struct ProcedureEntry {
    method: String,
    response: Option<MessageType>,
    filters: Vec<SharedFilter>,
    invocation: Invocation,
}

/// Collects the procedures of one service instance.
pub struct ProcedureSet<S> {
    service: Arc<S>,
    entries: Vec<ProcedureEntry>,
}

/// Handle returned when a procedure is declared, used to attach its filters.
pub struct ProcedureHandle<'a> {
    entry: &'a mut ProcedureEntry,
}

impl ProcedureHandle<'_> {
    /// Appends a procedure-level filter. Runs after all service filters.
    pub fn filter(self, filter: SharedFilter) -> Self {
        self.entry.filters.push(filter);
        self
    }
}

impl<S: RpcService> ProcedureSet<S> {
    fn new(service: Arc<S>) -> Self {
        Self {
            service,
            entries: Vec::new(),
        }
    }

    /// Declares `method(ctx, request) -> response`.
    pub fn unary<Req, Resp, F, Fut>(&mut self, method: &str, handler: F) -> ProcedureHandle<'_>
    where
        Req: Message,
        Resp: Message,
        F: Fn(Arc<S>, Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let call: UnaryFn = Arc::new(
            move |ctx: Context, payload: Payload| -> BoxFuture<anyhow::Result<Reply>> {
                match payload.downcast::<Req>() {
                    Ok(req) => {
                        let fut = handler(Arc::clone(&service), ctx, *req);
                        Box::pin(async move { fut.await.map(Reply::message) })
                    }
                    Err(_) => Box::pin(async { Err(payload_mismatch::<Req>()) }),
                }
            },
        );
        self.push(
            method,
            Some(MessageType::of::<Resp>()),
            Invocation::WithRequest {
                request: MessageType::of::<Req>(),
                decode: decode_payload::<Req>,
                call,
            },
        )
    }

    /// Declares `method(ctx, request)` with an empty result.
    pub fn unary_empty<Req, F, Fut>(&mut self, method: &str, handler: F) -> ProcedureHandle<'_>
    where
        Req: Message,
        F: Fn(Arc<S>, Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let call: UnaryFn = Arc::new(
            move |ctx: Context, payload: Payload| -> BoxFuture<anyhow::Result<Reply>> {
                match payload.downcast::<Req>() {
                    Ok(req) => {
                        let fut = handler(Arc::clone(&service), ctx, *req);
                        Box::pin(async move { fut.await.map(|()| Reply::empty()) })
                    }
                    Err(_) => Box::pin(async { Err(payload_mismatch::<Req>()) }),
                }
            },
        );
        self.push(
            method,
            None,
            Invocation::WithRequest {
                request: MessageType::of::<Req>(),
                decode: decode_payload::<Req>,
                call,
            },
        )
    }

    /// Declares `method(ctx) -> response`.
    pub fn nullary<Resp, F, Fut>(&mut self, method: &str, handler: F) -> ProcedureHandle<'_>
    where
        Resp: Message,
        F: Fn(Arc<S>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let call: NullaryFn = Arc::new(move |ctx: Context| -> BoxFuture<anyhow::Result<Reply>> {
            let fut = handler(Arc::clone(&service), ctx);
            Box::pin(async move { fut.await.map(Reply::message) })
        });
        self.push(
            method,
            Some(MessageType::of::<Resp>()),
            Invocation::WithoutRequest { call },
        )
    }

    /// Declares `method(ctx)` with an empty result.
    pub fn nullary_empty<F, Fut>(&mut self, method: &str, handler: F) -> ProcedureHandle<'_>
    where
        F: Fn(Arc<S>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let call: NullaryFn = Arc::new(move |ctx: Context| -> BoxFuture<anyhow::Result<Reply>> {
            let fut = handler(Arc::clone(&service), ctx);
            Box::pin(async move { fut.await.map(|()| Reply::empty()) })
        });
        self.push(method, None, Invocation::WithoutRequest { call })
    }

    fn push(
        &mut self,
        method: &str,
        response: Option<MessageType>,
        invocation: Invocation,
    ) -> ProcedureHandle<'_> {
        let index = self.entries.len();
        self.entries.push(ProcedureEntry {
            method: method.to_string(),
            response,
            filters: Vec::new(),
            invocation,
        });
        ProcedureHandle {
            entry: &mut self.entries[index],
        }
    }
}

fn payload_mismatch<Req: Message>() -> anyhow::Error {
    anyhow::anyhow!("payload is not a {}", Req::type_name())
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

/// The declared shape of one service instance, ready to be validated and
/// turned into descriptors.
pub struct ServiceDefinition {
    name: String,
    filters: Vec<SharedFilter>,
    entries: Vec<ProcedureEntry>,
}

impl ServiceDefinition {
    /// Collects the declaration of `service`.
    pub fn of<S: RpcService>(service: Arc<S>) -> Self {
        let name = service.name().to_string();
        let filters = service.filters();
        let mut set = ProcedureSet::new(service);
        S::procedures(&mut set);
        Self {
            name,
            filters,
            entries: set.entries,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared procedures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates names and builds one descriptor per procedure, with the
    /// service filters prepended to each procedure's filters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the service or a method name is not an
    /// identifier.
    pub fn into_descriptors(self) -> Result<Vec<ProcedureDescriptor>, DeclarationError> {
        validate_identifier("service", &self.name)?;
        for entry in &self.entries {
            validate_identifier("method", &entry.method)?;
        }

        Ok(self
            .entries
            .into_iter()
            .map(|entry| {
                ProcedureDescriptor::new(
                    &self.name,
                    &entry.method,
                    entry.response,
                    FilterChain::concat(&self.filters, &entry.filters),
                    entry.invocation,
                )
            })
            .collect())
    }
}

/// Identifiers are non-empty ASCII alphanumerics or `_`, not starting with a
/// digit. Keeps derived paths unambiguous.
fn validate_identifier(what: &'static str, name: &str) -> Result<(), DeclarationError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DeclarationError::InvalidName {
            what,
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
