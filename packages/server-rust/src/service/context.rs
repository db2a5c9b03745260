//! Context initialization: turns a raw request into the per-request
//! [`Context`] before any filter runs.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{Context, RawRequest};

/// Builds the `Context` for each request. May be asynchronous, e.g. to load
/// a session. A failure terminates the request as `ContextInitFailed`.
#[async_trait]
pub trait ContextInitializer: Send + Sync {
    async fn init(&self, request: Arc<RawRequest>) -> anyhow::Result<Context>;
}

/// Wraps the request in a fresh context with empty extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextInitializer;

#[async_trait]
impl ContextInitializer for DefaultContextInitializer {
    async fn init(&self, request: Arc<RawRequest>) -> anyhow::Result<Context> {
        Ok(Context::new(request))
    }
}

struct FnInitializer<F>(F);

#[async_trait]
impl<F, Fut> ContextInitializer for FnInitializer<F>
where
    F: Fn(Arc<RawRequest>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Context>> + Send,
{
    async fn init(&self, request: Arc<RawRequest>) -> anyhow::Result<Context> {
        (self.0)(request).await
    }
}

/// Builds an initializer from an async closure.
pub fn initializer_fn<F, Fut>(f: F) -> Arc<dyn ContextInitializer>
where
    F: Fn(Arc<RawRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Context>> + Send + 'static,
{
    Arc::new(FnInitializer(f))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tenant(String);

    #[tokio::test]
    async fn default_initializer_wraps_request() {
        let req = Arc::new(RawRequest::new("/Echo.Repeat", Bytes::from_static(b"x")));
        let ctx = DefaultContextInitializer.init(req).await.unwrap();
        assert_eq!(ctx.path(), "/Echo.Repeat");
        assert!(ctx.extensions().is_empty());
    }

    #[tokio::test]
    async fn closure_initializer_can_seed_extensions() {
        let init = initializer_fn(|req: Arc<RawRequest>| async move {
            let tenant = req.header("x-tenant").unwrap_or("default").to_string();
            let ctx = Context::new(req);
            ctx.extensions().insert(Tenant(tenant));
            Ok(ctx)
        });

        let req = Arc::new(RawRequest::new("/A.B", Bytes::new()).with_header("X-Tenant", "acme"));
        let ctx = init.init(req).await.unwrap();
        assert_eq!(ctx.extensions().get::<Tenant>(), Some(Tenant("acme".to_string())));
    }

    #[tokio::test]
    async fn closure_initializer_can_fail() {
        let init = initializer_fn(|_req: Arc<RawRequest>| async {
            Err(anyhow::anyhow!("no session"))
        });
        let req = Arc::new(RawRequest::new("/A.B", Bytes::new()));
        let err = init.init(req).await.unwrap_err();
        assert_eq!(err.to_string(), "no session");
    }
}
