//! Raw socket binding: length-delimited MsgPack frames over TCP.
//!
//! Each frame carries one [`WireRequest`] and is answered by one
//! [`WireResponse`] with the same `id`. Requests on a connection run as
//! independent tasks, so responses may arrive out of order.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use switchyard_core::{Codec, DeclarationError, ErrorKind, RawRequest, RequestError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, warn};

use super::binding::{BindingCore, ServerBinding};
use super::config::SocketBindingConfig;
use super::shutdown::{shutdown_requested, BindingState, ShutdownController};
use super::status::ErrorCodeTable;
use crate::service::lifecycle::Dispatcher;
use crate::service::middleware::{build_dispatch_pipeline, run_pipeline, DispatchPipeline};

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// One request frame.
///
/// A `content-type` entry in `headers` selects the body codec; MsgPack is
/// the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(with = "serde_bytes", default)]
    pub body: Vec<u8>,
}

/// One response frame. `status` comes from the socket error-code table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,
    pub status: u16,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

/// Builds the frame codec shared by the server and its clients.
#[must_use]
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

// ---------------------------------------------------------------------------
// SocketBinding
// ---------------------------------------------------------------------------

/// TCP transport binding speaking the framed wire envelope.
pub struct SocketBinding {
    core: BindingCore,
    config: Arc<SocketBindingConfig>,
    codes: Arc<ErrorCodeTable<u16>>,
}

impl SocketBinding {
    #[must_use]
    pub fn new(name: impl Into<String>, config: SocketBindingConfig) -> Self {
        Self {
            core: BindingCore::new(name, config.drain_timeout),
            config: Arc::new(config),
            codes: Arc::new(ErrorCodeTable::socket()),
        }
    }

    /// Replaces the default socket error-code mapping.
    #[must_use]
    pub fn with_error_codes(mut self, codes: ErrorCodeTable<u16>) -> Self {
        self.codes = Arc::new(codes);
        self
    }

    /// Address the listener is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(self.core.shutdown())
    }
}

#[async_trait]
impl ServerBinding for SocketBinding {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn install(&self, dispatcher: Dispatcher) -> Result<(), DeclarationError> {
        self.core.install(dispatcher)
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.core
            .start(|dispatcher| async move {
                let listener = TcpListener::bind(self.config.bind_addr()).await?;
                let addr = listener.local_addr()?;
                let shared = Arc::new(Shared {
                    pipeline: build_dispatch_pipeline(dispatcher),
                    shutdown: Arc::clone(self.core.shutdown()),
                    config: Arc::clone(&self.config),
                    codes: Arc::clone(&self.codes),
                });
                let signal = shared.shutdown.shutdown_receiver();
                let handle = tokio::spawn(accept_loop(listener, shared, signal));
                Ok((addr, handle))
            })
            .await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.core.stop().await
    }

    fn state(&self) -> BindingState {
        self.core.state()
    }
}

impl std::fmt::Debug for SocketBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketBinding")
            .field("core", &self.core)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

/// State shared by the accept loop and every connection task.
struct Shared {
    pipeline: DispatchPipeline,
    shutdown: Arc<ShutdownController>,
    config: Arc<SocketBindingConfig>,
    codes: Arc<ErrorCodeTable<u16>>,
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut signal: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            () = shutdown_requested(&mut signal) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "socket connection accepted");
                    // Cloned before the spawn: a shutdown racing this accept
                    // is still visible to the connection.
                    let signal = signal.clone();
                    tokio::spawn(serve_connection(stream, peer, Arc::clone(&shared), signal));
                }
                Err(e) => warn!("accept failed: {e}"),
            },
        }
    }

    Ok(())
}

/// Reads frames until the peer hangs up or the binding stops, spawning one
/// task per request. Responses funnel through a bounded queue to a single
/// writer task.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut signal: watch::Receiver<bool>,
) {
    let framed = Framed::new(stream, frame_codec(shared.config.max_frame_bytes));
    let (mut sink, mut frames) = framed.split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(shared.config.outbound_channel_capacity);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                debug!(%peer, "socket write failed: {e}");
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown_requested(&mut signal) => break,
            frame = frames.next() => frame,
        };
        match frame {
            None => break,
            Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                // Oversized or corrupt length prefix; the stream cannot be
                // resynchronised, so answer once and close.
                warn!(%peer, "socket frame rejected: {e}");
                let error = RequestError::new(
                    ErrorKind::MalformedPayload,
                    format!("frame rejected: {e}"),
                );
                let response = error_response(&shared, &error);
                send_response(&tx, peer, &response).await;
                break;
            }
            Some(Err(e)) => {
                debug!(%peer, "socket read failed: {e}");
                break;
            }
            Some(Ok(frame)) => {
                let guard = shared.shutdown.in_flight_guard();
                let shared = Arc::clone(&shared);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    let response = handle_frame(&shared, frame.freeze(), peer).await;
                    send_response(&tx, peer, &response).await;
                });
            }
        }
    }

    // The writer exits after the last in-flight task drops its sender.
    drop(tx);
    let _ = writer.await;
    debug!(%peer, "socket connection closed");
}

async fn send_response(tx: &mpsc::Sender<Bytes>, peer: SocketAddr, response: &WireResponse) {
    match rmp_serde::to_vec_named(response) {
        Ok(bytes) => {
            // The writer is gone once the peer disconnects.
            let _ = tx.send(Bytes::from(bytes)).await;
        }
        Err(e) => error!(%peer, id = response.id, "response frame could not be encoded: {e}"),
    }
}

/// Response to a frame whose request id could not be read.
fn error_response(shared: &Shared, error: &RequestError) -> WireResponse {
    let rendered = shared.codes.render_error(error, Codec::MsgPack);
    WireResponse {
        id: 0,
        status: rendered.status,
        body: rendered.body.to_vec(),
    }
}

async fn handle_frame(shared: &Shared, frame: Bytes, peer: SocketAddr) -> WireResponse {
    let request: WireRequest = match rmp_serde::from_slice(&frame) {
        Ok(request) => request,
        Err(e) => {
            let error = RequestError::new(
                ErrorKind::MalformedPayload,
                format!("invalid request envelope: {e}"),
            );
            return error_response(shared, &error);
        }
    };

    let codec = request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .and_then(|(_, value)| Codec::from_content_type(value))
        .unwrap_or_default();

    let id = request.id;
    let mut raw = RawRequest::new(request.path, request.body)
        .with_codec(codec)
        .with_peer(peer);
    for (name, value) in request.headers {
        raw = raw.with_header(&name, value);
    }

    let outcome = run_pipeline(&shared.pipeline, raw).await;
    let rendered = shared.codes.render(&outcome, codec);
    WireResponse {
        id,
        status: rendered.status,
        body: rendered.body.to_vec(),
    }
}
