//! Message contract: typed payloads, their identity, and wire codecs.
//!
//! Any `serde` type can become a [`Message`] by opting in with an empty impl.
//! The core only ever compares [`MessageType`] identities and asks a
//! [`Codec`] to move values to and from bytes; it never inspects content.
//!
//! `MsgPack` uses named maps (`rmp_serde::to_vec_named`) so field names are
//! preserved on the wire, matching the JSON shape of the same message.

use std::any::{Any, TypeId};
use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A schema-typed request or response payload.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable identity used in logs and descriptors.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Structural identity of a message type.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Identity of `T`.
    #[must_use]
    pub fn of<T: Message>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::type_name(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Returns `true` if this identity belongs to `T`.
    #[must_use]
    pub fn is<T: Message>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Failure to encode or decode a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire format used for request and response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    MsgPack,
    Json,
}

impl Codec {
    pub const MSGPACK_CONTENT_TYPE: &'static str = "application/msgpack";
    pub const JSON_CONTENT_TYPE: &'static str = "application/json";

    /// Content type advertised for this codec.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Codec::MsgPack => Self::MSGPACK_CONTENT_TYPE,
            Codec::Json => Self::JSON_CONTENT_TYPE,
        }
    }

    /// Resolves a codec from a `content-type` header value.
    ///
    /// Parameters such as `; charset=utf-8` are ignored. Unknown types
    /// return `None`.
    #[must_use]
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/msgpack" | "application/x-msgpack" | "application/vnd.msgpack" => {
                Some(Codec::MsgPack)
            }
            "application/json" => Some(Codec::Json),
            _ => None,
        }
    }

    /// Encodes a value.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the value cannot be represented.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes, CodecError> {
        let bytes = match self {
            Codec::MsgPack => rmp_serde::to_vec_named(value)?,
            Codec::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decodes a value.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the bytes do not describe a `T`.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Object-safe view of a message, used to carry handler results back to a
/// binding without knowing their concrete type.
pub trait AnyMessage: Send + Sync {
    fn message_type(&self) -> MessageType;

    /// Encodes the message with the given codec.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if encoding fails.
    fn encode(&self, codec: Codec) -> Result<Bytes, CodecError>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Message> AnyMessage for T {
    fn message_type(&self) -> MessageType {
        MessageType::of::<T>()
    }

    fn encode(&self, codec: Codec) -> Result<Bytes, CodecError> {
        codec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Result of a successful invocation: one message, or nothing.
pub struct Reply(Option<Box<dyn AnyMessage>>);

impl Reply {
    #[must_use]
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn message<T: Message>(message: T) -> Self {
        Self(Some(Box::new(message)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Identity of the carried message, if any.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        self.0.as_ref().map(|m| m.message_type())
    }

    /// Borrows the carried message as `T`.
    #[must_use]
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|m| m.as_any().downcast_ref::<T>())
    }

    /// Encodes the reply. An empty reply encodes to an empty body.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the carried message cannot be encoded.
    pub fn encode(&self, codec: Codec) -> Result<Bytes, CodecError> {
        match &self.0 {
            Some(message) => message.encode(codec),
            None => Ok(Bytes::new()),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type() {
            Some(ty) => write!(f, "Reply({ty:?})"),
            None => f.write_str("Reply(empty)"),
        }
    }
}
