//! Mapping from request outcomes to transport status codes and bodies.

use std::collections::HashMap;

use axum::http::StatusCode;
use bytes::Bytes;
use switchyard_core::{Codec, ErrorKind, RequestError};
use tracing::error;

use crate::service::lifecycle::Outcome;

/// Per-transport table from error kind to status.
///
/// Kinds without an explicit entry map to the fallback status.
#[derive(Debug, Clone)]
pub struct ErrorCodeTable<S> {
    ok: S,
    codes: HashMap<ErrorKind, S>,
    fallback: S,
}

/// A fully rendered response, ready for a transport to write.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedResponse<S> {
    pub status: S,
    pub body: Bytes,
    pub content_type: &'static str,
    /// Set for non-success outcomes.
    pub error_kind: Option<ErrorKind>,
}

impl<S: Copy> ErrorCodeTable<S> {
    /// Creates a table where every error kind maps to `fallback`.
    #[must_use]
    pub fn new(ok: S, fallback: S) -> Self {
        Self {
            ok,
            codes: HashMap::new(),
            fallback,
        }
    }

    /// Sets the status for one kind.
    #[must_use]
    pub fn with(mut self, kind: ErrorKind, status: S) -> Self {
        self.codes.insert(kind, status);
        self
    }

    #[must_use]
    pub fn ok(&self) -> S {
        self.ok
    }

    #[must_use]
    pub fn status_for(&self, kind: ErrorKind) -> S {
        self.codes.get(&kind).copied().unwrap_or(self.fallback)
    }

    /// Serializes an outcome with `codec`.
    ///
    /// Success bodies carry the encoded reply (empty for an empty reply).
    /// Failures carry an `ErrorBody`. A reply that fails to encode is
    /// reported as an `InvocationFault`.
    #[must_use]
    pub fn render(&self, outcome: &Outcome, codec: Codec) -> RenderedResponse<S> {
        let failure = match outcome {
            Outcome::Responded(reply) => match reply.encode(codec) {
                Ok(body) => {
                    return RenderedResponse {
                        status: self.ok,
                        body,
                        content_type: codec.content_type(),
                        error_kind: None,
                    };
                }
                Err(e) => RequestError::with_source(
                    ErrorKind::InvocationFault,
                    format!("reply could not be encoded: {e}"),
                    e,
                ),
            },
            Outcome::Rejected(e) | Outcome::Errored(e) => return self.render_error(e, codec),
        };
        self.render_error(&failure, codec)
    }

    /// Serializes a failure as an `ErrorBody`.
    #[must_use]
    pub fn render_error(&self, failure: &RequestError, codec: Codec) -> RenderedResponse<S> {
        let body = codec.encode(&failure.to_body()).unwrap_or_else(|e| {
            error!(kind = failure.kind().as_str(), "error body could not be encoded: {e}");
            Bytes::new()
        });
        RenderedResponse {
            status: self.status_for(failure.kind()),
            body,
            content_type: codec.content_type(),
            error_kind: Some(failure.kind()),
        }
    }
}

impl ErrorCodeTable<StatusCode> {
    /// HTTP mapping: 404 / 403 / 400, everything else 500.
    #[must_use]
    pub fn http() -> Self {
        Self::new(StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR)
            .with(ErrorKind::UnknownProcedure, StatusCode::NOT_FOUND)
            .with(ErrorKind::FilterDenied, StatusCode::FORBIDDEN)
            .with(ErrorKind::MalformedPayload, StatusCode::BAD_REQUEST)
    }
}

/// Numeric status codes used by the socket binding.
pub mod socket_status {
    pub const OK: u16 = 0;
    pub const INVALID_ARGUMENT: u16 = 3;
    pub const PERMISSION_DENIED: u16 = 7;
    pub const UNIMPLEMENTED: u16 = 12;
    pub const INTERNAL: u16 = 13;
}

impl ErrorCodeTable<u16> {
    /// Socket mapping, numbered like gRPC status codes.
    #[must_use]
    pub fn socket() -> Self {
        Self::new(socket_status::OK, socket_status::INTERNAL)
            .with(ErrorKind::UnknownProcedure, socket_status::UNIMPLEMENTED)
            .with(ErrorKind::FilterDenied, socket_status::PERMISSION_DENIED)
            .with(ErrorKind::MalformedPayload, socket_status::INVALID_ARGUMENT)
    }
}
