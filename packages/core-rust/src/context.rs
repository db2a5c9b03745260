use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::message::Codec;

// ---------------------------------------------------------------------------
// RawRequest
// ---------------------------------------------------------------------------

/// A request as handed over by a binding, before any routing.
#[derive(Debug, Clone)]
pub struct RawRequest {
    /// Target procedure path, e.g. `/Echo.Repeat`.
    pub path: String,
    /// Undecoded request body.
    pub body: Bytes,
    /// Transport metadata. Names are stored lower-cased.
    pub headers: HashMap<String, String>,
    /// Remote address, when the transport knows it.
    pub peer: Option<SocketAddr>,
    /// Wire format of `body` and of the eventual response.
    pub codec: Codec,
}

impl RawRequest {
    pub fn new(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
            headers: HashMap::new(),
            peer: None,
            codec: Codec::default(),
        }
    }

    /// Adds a header, lower-casing its name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

/// Typed per-request storage that lets filters hand data to later filters
/// and to the handler. One value per type.
#[derive(Default)]
pub struct Extensions {
    map: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Extensions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.map
            .write()
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok().map(|b| *b))
    }

    /// Returns a clone of the stored value of type `T`.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.read().contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok().map(|b| *b))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-request carrier passed to every filter and handler.
///
/// Created once per request by a context initializer and dropped when the
/// request reaches a terminal state. Cloning is cheap and every clone sees
/// the same extensions.
#[derive(Debug, Clone)]
pub struct Context {
    request_id: Uuid,
    request: Arc<RawRequest>,
    extensions: Arc<Extensions>,
}

impl Context {
    /// Wraps a request with empty extensions.
    ///
    /// The request id is taken from a UUID-valued `x-request-id` header when
    /// the transport supplied one; otherwise a fresh v4 id is generated.
    #[must_use]
    pub fn new(request: Arc<RawRequest>) -> Self {
        let request_id = request
            .header("x-request-id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .unwrap_or_else(Uuid::new_v4);
        Self {
            request_id,
            request,
            extensions: Arc::new(Extensions::new()),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn request(&self) -> &RawRequest {
        &self.request
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.request.path
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Undecoded request body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.request.body
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.request.peer
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Session {
        user: String,
    }

    #[test]
    fn headers_are_case_insensitive() {
        let req = RawRequest::new("/Echo.Repeat", Bytes::new()).with_header("X-Auth", "token");
        assert_eq!(req.header("x-auth"), Some("token"));
        assert_eq!(req.header("X-AUTH"), Some("token"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn extensions_are_shared_between_clones() {
        let ctx = Context::new(Arc::new(RawRequest::new("/A.B", Bytes::new())));
        let clone = ctx.clone();
        assert!(!ctx.extensions().contains::<Session>());

        clone.extensions().insert(Session {
            user: "ada".to_string(),
        });

        assert_eq!(
            ctx.extensions().get::<Session>(),
            Some(Session {
                user: "ada".to_string()
            })
        );
        assert_eq!(ctx.request_id(), clone.request_id());
    }

    #[test]
    fn extensions_insert_replaces_and_remove_takes() {
        let ext = Extensions::new();
        assert!(ext.is_empty());
        assert_eq!(ext.insert(1_u32), None);
        assert_eq!(ext.insert(2_u32), Some(1));
        assert_eq!(ext.len(), 1);
        assert_eq!(ext.remove::<u32>(), Some(2));
        assert!(ext.get::<u32>().is_none());
    }

    #[test]
    fn each_context_gets_its_own_id() {
        let req = Arc::new(RawRequest::new("/A.B", Bytes::new()));
        let a = Context::new(Arc::clone(&req));
        let b = Context::new(req);
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.path(), "/A.B");
    }

    #[test]
    fn request_id_header_is_reused_when_it_is_a_uuid() {
        let id = Uuid::new_v4();
        let req = RawRequest::new("/A.B", Bytes::from_static(b"raw"))
            .with_header("X-Request-Id", id.to_string());
        let ctx = Context::new(Arc::new(req));
        assert_eq!(ctx.request_id(), id);
        assert_eq!(&ctx.body()[..], b"raw");

        let req = RawRequest::new("/A.B", Bytes::new()).with_header("x-request-id", "not-a-uuid");
        let ctx = Context::new(Arc::new(req));
        assert_ne!(ctx.request_id().to_string(), "not-a-uuid");
    }
}
