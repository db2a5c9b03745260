//! Transport-level HTTP middleware.
//!
//! Procedure concerns (filters, metrics) run inside the dispatch pipeline;
//! the layers here only deal with HTTP itself.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::HeaderName;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use super::config::HttpBindingConfig;

/// Header carrying the per-request id, also copied into the dispatch context.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wraps `router` in the binding's HTTP layers, outermost first:
///
/// 1. request id: a UUID is assigned when the client sent none
/// 2. an `http` span per request carrying binding, method, uri and id
/// 3. body limit: anything above `max_body_bytes` gets a 413
/// 4. the request id is copied onto the response
pub fn with_http_layers<S>(
    router: Router<S>,
    binding: &str,
    config: &HttpBindingConfig,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let binding: Arc<str> = Arc::from(binding);

    let trace = TraceLayer::new_for_http().make_span_with(move |req: &Request| {
        let id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        info_span!(
            "http",
            binding = %binding,
            method = %req.method(),
            uri = %req.uri(),
            request_id = id,
        )
    });

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
            .layer(trace)
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(PropagateRequestIdLayer::new(request_id)),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, Bytes};
    use axum::http::StatusCode;
    use axum::routing::post;
    use tower::ServiceExt;

    use super::*;

    fn app(max_body_bytes: usize) -> Router {
        let config = HttpBindingConfig {
            max_body_bytes,
            ..HttpBindingConfig::default()
        };
        let router = Router::new().route(
            "/sink",
            post(|body: Bytes| async move { body.len().to_string() }),
        );
        with_http_layers(router, "test", &config)
    }

    #[tokio::test]
    async fn generated_request_id_is_returned() {
        let response = app(1024)
            .oneshot(Request::post("/sink").body(Body::from("abc")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn client_request_id_is_kept() {
        let response = app(1024)
            .oneshot(
                Request::post("/sink")
                    .header(REQUEST_ID_HEADER, "client-chosen")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "client-chosen");
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let response = app(4)
            .oneshot(Request::post("/sink").body(Body::from("too large")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
