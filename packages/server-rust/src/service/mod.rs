//! Service declaration, registration, and request dispatch.
//!
//! 1. **Declaration** (`definition`, `filter`): services list their procedures
//!    and filters through `ProcedureSet`
//! 2. **Registration** (`registry`): descriptors are validated, collected, and
//!    frozen into a `ProcedureTable` on first attach
//! 3. **Dispatch** (`lifecycle`, `context`): each request is resolved,
//!    filtered, decoded, and invoked by the `Dispatcher`
//! 4. **Middleware** (`middleware`): tower layers around the dispatcher

pub mod context;
pub mod definition;
pub mod filter;
pub mod lifecycle;
pub mod middleware;
pub mod procedure;
pub mod registry;
pub mod router;

// Re-export key types for convenient access.
pub use context::{initializer_fn, ContextInitializer, DefaultContextInitializer};
pub use definition::{ProcedureHandle, ProcedureSet, RpcService, ServiceDefinition};
pub use filter::{filter_fn, ChainVerdict, Filter, FilterChain, SharedFilter};
pub use lifecycle::{Dispatcher, LifecycleState, Outcome};
pub use procedure::{Invocation, ProcedureDescriptor};
pub use registry::{BindingFailure, BindingFailures, ServiceRegistry};
pub use router::ProcedureTable;
