//! Switchyard Server: service registry, filter chains, request lifecycle,
//! and the HTTP and socket bindings that serve them.

pub mod network;
pub mod service;

pub use network::{
    BindingState, ErrorCodeTable, HttpBinding, HttpBindingConfig, ServerBinding, SocketBinding,
    SocketBindingConfig,
};
pub use service::{
    filter_fn, initializer_fn, ContextInitializer, Dispatcher, Filter, Outcome, ProcedureSet,
    RpcService, ServiceRegistry,
};
pub use switchyard_core::{Codec, Context, ErrorKind, Message, RawRequest, Reply, RequestError};
