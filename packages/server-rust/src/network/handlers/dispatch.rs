//! Procedure dispatch handler: `POST /<Service>.<Method>`.

use std::net::SocketAddr;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use switchyard_core::{Codec, RawRequest};
use tracing::debug;

use super::AppState;
use crate::service::middleware::run_pipeline;

/// Response header naming the error kind of a failed request.
pub const ERROR_KIND_HEADER: &str = "x-switchyard-error";

/// Runs the request lifecycle for any path not claimed by another route.
///
/// - non-`POST` methods get 405
/// - an unrecognised `content-type` gets 415; a missing one selects the
///   configured default codec
/// - every other request produces a response rendered from its outcome
pub async fn dispatch_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    if parts.method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "POST")]).into_response();
    }

    let codec = match parts.headers.get(header::CONTENT_TYPE) {
        None => state.config.default_codec,
        Some(value) => match value.to_str().ok().and_then(Codec::from_content_type) {
            Some(codec) => codec,
            None => return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response(),
        },
    };

    let body = match to_bytes(body, state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            debug!(path = parts.uri.path(), "request body rejected: {e}");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut raw = RawRequest::new(parts.uri.path(), body).with_codec(codec);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            raw = raw.with_header(name.as_str(), value);
        }
    }
    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        raw = raw.with_peer(*peer);
    }

    let outcome = {
        let _guard = state.shutdown.in_flight_guard();
        run_pipeline(&state.pipeline, raw).await
    };

    let rendered = state.codes.render(&outcome, codec);
    let mut response = (rendered.status, rendered.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(rendered.content_type),
    );
    if let Some(kind) = rendered.error_kind {
        headers.insert(
            HeaderName::from_static(ERROR_KIND_HEADER),
            HeaderValue::from_static(kind.as_str()),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::Router;
    use switchyard_core::{ErrorBody, ErrorKind};
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::test_support::{app_state, Text};

    fn router() -> Router {
        Router::new().fallback(dispatch_handler).with_state(app_state())
    }

    fn post(path: &str, content_type: Option<&str>, body: impl Into<Body>) -> Request {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(body.into()).unwrap()
    }

    async fn body_bytes(response: Response) -> bytes::Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn json_echo_round_trip() {
        let response = router()
            .oneshot(post("/Echo.Repeat", Some("application/json"), r#"{"text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(response.headers().get(ERROR_KIND_HEADER).is_none());
        assert_eq!(&body_bytes(response).await[..], br#"{"text":"hi"}"#);
    }

    #[tokio::test]
    async fn missing_content_type_uses_default_codec() {
        let body = Codec::MsgPack.encode(&Text { text: "mp".into() }).unwrap();
        let response = router().oneshot(post("/Echo.Repeat", None, body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/msgpack");
        let text: Text = Codec::MsgPack.decode(&body_bytes(response).await).unwrap();
        assert_eq!(text.text, "mp");
    }

    #[tokio::test]
    async fn unknown_path_is_404_with_error_body() {
        let response = router()
            .oneshot(post("/Echo.Nope", Some("application/json"), "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[ERROR_KIND_HEADER], "UnknownProcedure");
        let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.kind, ErrorKind::UnknownProcedure);
    }

    #[tokio::test]
    async fn filter_denial_is_403() {
        let response = router()
            .oneshot(post("/Echo.Guarded", Some("application/json"), r#"{"text":"x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[ERROR_KIND_HEADER], "FilterDenied");
    }

    #[tokio::test]
    async fn request_headers_reach_filters() {
        let mut request = post("/Echo.Guarded", Some("application/json"), r#"{"text":"x"}"#);
        request
            .headers_mut()
            .insert("x-auth", HeaderValue::from_static("token"));
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let response = router()
            .oneshot(post("/Echo.Repeat", Some("application/json"), "{nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[ERROR_KIND_HEADER], "MalformedPayload");
    }

    #[tokio::test]
    async fn get_is_method_not_allowed() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/Echo.Repeat")
            .body(Body::empty())
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[tokio::test]
    async fn unknown_content_type_is_415() {
        let response = router()
            .oneshot(post("/Echo.Repeat", Some("text/plain"), "hi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
