//! Transport bindings, their configuration, status mapping, and shutdown control.

pub mod binding;
pub mod config;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod shutdown;
pub mod socket;
pub mod status;

pub use binding::ServerBinding;
pub use config::*;
pub use handlers::AppState;
pub use self::http::HttpBinding;
pub use shutdown::*;
pub use socket::{frame_codec, SocketBinding, WireRequest, WireResponse};
pub use status::{socket_status, ErrorCodeTable, RenderedResponse};
