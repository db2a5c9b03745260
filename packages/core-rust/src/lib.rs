//! Switchyard Core: message contract, per-request context, and error taxonomy
//! shared by the server runtime and its transport bindings.

pub mod context;
pub mod error;
pub mod message;

pub use context::{Context, Extensions, RawRequest};
pub use error::{DeclarationError, ErrorBody, ErrorKind, RequestError};
pub use message::{AnyMessage, Codec, CodecError, Message, MessageType, Reply};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
