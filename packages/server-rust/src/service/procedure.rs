//! Procedure descriptors: metadata plus a typed invocation for one exposed
//! operation.
//!
//! Handlers come in two shapes, modelled as [`Invocation`] variants: with a
//! request message, or without one. The shape is fixed when the service is
//! declared, so the lifecycle only has to honour [`ProcedureDescriptor::decode`]
//! and [`ProcedureDescriptor::invoke`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use switchyard_core::{
    Codec, CodecError, Context, ErrorKind, Message, MessageType, Reply, RequestError,
};

use super::filter::FilterChain;

/// Decoded request value, type-erased between decode and invoke.
pub type Payload = Box<dyn Any + Send>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type UnaryFn = Arc<dyn Fn(Context, Payload) -> BoxFuture<anyhow::Result<Reply>> + Send + Sync>;
pub type NullaryFn = Arc<dyn Fn(Context) -> BoxFuture<anyhow::Result<Reply>> + Send + Sync>;
pub type DecodeFn = fn(Codec, &[u8]) -> Result<Payload, CodecError>;

/// Decoder stored for procedures whose request type is `T`.
pub(crate) fn decode_payload<T: Message>(
    codec: Codec,
    bytes: &[u8],
) -> Result<Payload, CodecError> {
    Ok(Box::new(codec.decode::<T>(bytes)?))
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Bound handler of a procedure.
#[derive(Clone)]
pub enum Invocation {
    /// `handler(ctx, request)`.
    WithRequest {
        request: MessageType,
        decode: DecodeFn,
        call: UnaryFn,
    },
    /// `handler(ctx)`.
    WithoutRequest { call: NullaryFn },
}

// ---------------------------------------------------------------------------
// ProcedureDescriptor
// ---------------------------------------------------------------------------

/// Everything needed to serve one procedure.
#[derive(Clone)]
pub struct ProcedureDescriptor {
    service: String,
    method: String,
    path: String,
    response: Option<MessageType>,
    filters: FilterChain,
    invocation: Invocation,
}

impl ProcedureDescriptor {
    pub(crate) fn new(
        service: &str,
        method: &str,
        response: Option<MessageType>,
        filters: FilterChain,
        invocation: Invocation,
    ) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            path: Self::path_for(service, method),
            response,
            filters,
            invocation,
        }
    }

    /// Canonical, case-sensitive path of `service.method`.
    #[must_use]
    pub fn path_for(service: &str, method: &str) -> String {
        format!("/{service}.{method}")
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Expected request type, or `None` for procedures that take no payload.
    #[must_use]
    pub fn request_type(&self) -> Option<MessageType> {
        match &self.invocation {
            Invocation::WithRequest { request, .. } => Some(*request),
            Invocation::WithoutRequest { .. } => None,
        }
    }

    /// Response type, or `None` when the procedure replies with nothing.
    #[must_use]
    pub fn response_type(&self) -> Option<MessageType> {
        self.response
    }

    /// Effective filter chain: service filters followed by this procedure's.
    #[must_use]
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Decodes a raw body into this procedure's request type.
    ///
    /// Procedures without a request type accept only an empty body; anything
    /// else is reported as `MalformedPayload` rather than silently dropped.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedPayload` error if the body cannot be decoded.
    pub fn decode(&self, codec: Codec, body: &[u8]) -> Result<Option<Payload>, RequestError> {
        match &self.invocation {
            Invocation::WithRequest {
                request, decode, ..
            } => decode(codec, body).map(Some).map_err(|e| {
                RequestError::with_source(
                    ErrorKind::MalformedPayload,
                    format!("{}: body is not a valid {}", self.path, request.name()),
                    e,
                )
            }),
            Invocation::WithoutRequest { .. } if body.is_empty() => Ok(None),
            Invocation::WithoutRequest { .. } => Err(RequestError::new(
                ErrorKind::MalformedPayload,
                format!(
                    "{} takes no request, but a {}-byte body was sent",
                    self.path,
                    body.len()
                ),
            )),
        }
    }

    /// Calls the bound handler.
    ///
    /// `payload` must be present exactly when the procedure declares a
    /// request type.
    ///
    /// # Errors
    ///
    /// Returns an `InvocationFault` wrapping the handler's error, or
    /// describing the contract violation when `payload` does not match.
    pub async fn invoke(
        &self,
        ctx: Context,
        payload: Option<Payload>,
    ) -> Result<Reply, RequestError> {
        let fut = match (&self.invocation, payload) {
            (Invocation::WithRequest { request, call, .. }, Some(payload)) => {
                if (*payload).type_id() != request.type_id() {
                    return Err(self.contract_violation(&format!(
                        "payload is not a {}",
                        request.name()
                    )));
                }
                call(ctx, payload)
            }
            (Invocation::WithoutRequest { call }, None) => call(ctx),
            (Invocation::WithRequest { .. }, None) => {
                return Err(self.contract_violation("missing request payload"));
            }
            (Invocation::WithoutRequest { .. }, Some(_)) => {
                return Err(self.contract_violation("procedure takes no payload"));
            }
        };

        fut.await.map_err(|e| {
            RequestError::with_source(
                ErrorKind::InvocationFault,
                format!("{} failed: {e}", self.path),
                e,
            )
        })
    }

    fn contract_violation(&self, detail: &str) -> RequestError {
        RequestError::new(
            ErrorKind::InvocationFault,
            format!("{}: invocation contract violated: {detail}", self.path),
        )
    }
}

impl fmt::Debug for ProcedureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDescriptor")
            .field("path", &self.path)
            .field("request", &self.request_type())
            .field("response", &self.response)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};
    use switchyard_core::RawRequest;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Text {
        text: String,
    }

    impl Message for Text {}

    fn ctx() -> Context {
        Context::new(Arc::new(RawRequest::new("/Echo.Repeat", Bytes::new())))
    }

    fn echo_descriptor() -> ProcedureDescriptor {
        let call: UnaryFn = Arc::new(|_ctx: Context, payload: Payload| {
            Box::pin(async move {
                let text = payload
                    .downcast::<Text>()
                    .map_err(|_| anyhow::anyhow!("wrong payload"))?;
                Ok(Reply::message(*text))
            }) as BoxFuture<anyhow::Result<Reply>>
        });
        ProcedureDescriptor::new(
            "Echo",
            "Repeat",
            Some(MessageType::of::<Text>()),
            FilterChain::default(),
            Invocation::WithRequest {
                request: MessageType::of::<Text>(),
                decode: decode_payload::<Text>,
                call,
            },
        )
    }

    fn ping_descriptor(fail: bool) -> ProcedureDescriptor {
        let call: NullaryFn = Arc::new(move |_ctx: Context| {
            Box::pin(async move {
                if fail {
                    Err(anyhow::anyhow!("boom"))
                } else {
                    Ok(Reply::empty())
                }
            }) as BoxFuture<anyhow::Result<Reply>>
        });
        ProcedureDescriptor::new(
            "Health",
            "Ping",
            None,
            FilterChain::default(),
            Invocation::WithoutRequest { call },
        )
    }

    #[test]
    fn path_is_service_dot_method() {
        assert_eq!(ProcedureDescriptor::path_for("Echo", "Repeat"), "/Echo.Repeat");
        let desc = echo_descriptor();
        assert_eq!(desc.path(), "/Echo.Repeat");
        assert_eq!(desc.service(), "Echo");
        assert_eq!(desc.method(), "Repeat");
        assert_eq!(desc.request_type(), Some(MessageType::of::<Text>()));
        assert_eq!(desc.response_type(), Some(MessageType::of::<Text>()));
    }

    #[tokio::test]
    async fn decode_then_invoke_round_trip() {
        let desc = echo_descriptor();
        let body = Codec::Json.encode(&Text { text: "hi".into() }).unwrap();
        let payload = desc.decode(Codec::Json, &body).unwrap();
        let reply = desc.invoke(ctx(), payload).await.unwrap();
        assert_eq!(reply.downcast_ref::<Text>().unwrap().text, "hi");
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let desc = echo_descriptor();
        let err = desc.decode(Codec::Json, b"not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert!(err.cause().is_some());
    }

    #[test]
    fn no_request_procedure_rejects_non_empty_body() {
        let desc = ping_descriptor(false);
        assert!(desc.request_type().is_none());
        assert!(desc.decode(Codec::MsgPack, b"").unwrap().is_none());
        let err = desc.decode(Codec::MsgPack, b"\x80").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    }

    #[tokio::test]
    async fn handler_error_becomes_invocation_fault() {
        let desc = ping_descriptor(true);
        let err = desc.invoke(ctx(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvocationFault);
        assert_eq!(err.cause().unwrap().to_string(), "boom");
    }

    #[tokio::test]
    async fn payload_presence_must_match_shape() {
        let err = echo_descriptor().invoke(ctx(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvocationFault);

        let err = ping_descriptor(false)
            .invoke(ctx(), Some(Box::new(Text { text: "x".into() }) as Payload))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvocationFault);

        let err = echo_descriptor()
            .invoke(ctx(), Some(Box::new(42_u32) as Payload))
            .await
            .unwrap_err();
        assert!(err.message().contains("payload is not a"));
    }
}
